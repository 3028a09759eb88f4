//! Transport abstraction
//!
//! The session client only needs an ordered, bidirectional channel of text
//! messages to the companion. The WebSocket implementation lives in the CLI
//! crate; [`memory`] provides an in-process pair for tests.

pub mod memory;

use async_trait::async_trait;

use crate::config::ClientConfig;
use crate::error::TransportError;

/// An open message channel to the companion
#[async_trait]
pub trait Transport: Send {
    /// Send one message
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Receive the next message, `None` once the channel is closed
    ///
    /// Must be cancel-safe: the driver polls it inside `tokio::select!`.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the channel
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports to the companion
#[async_trait]
pub trait Connector: Send + Sync {
    /// The transport type produced by this connector
    type Transport: Transport + 'static;

    /// Open a new channel using the given configuration
    async fn connect(&self, config: &ClientConfig) -> Result<Self::Transport, TransportError>;
}
