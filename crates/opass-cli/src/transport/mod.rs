//! Transports to the companion process

mod ws;

pub use ws::{WsConnector, WsTransport};
