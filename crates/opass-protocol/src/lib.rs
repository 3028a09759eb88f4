//! opass-protocol: Wire protocol for the opass companion client
//!
//! This crate defines the JSON envelope exchanged with the companion
//! process over its WebSocket endpoint, the typed payloads carried inside
//! it, and the base64 dialect the peer uses for every binary value.

pub mod base64;
pub mod codec;
pub mod error;
pub mod message;

pub use codec::{EnvelopeCodec, InboundEnvelope};
pub use error::ProtocolError;
pub use message::{Action, EncryptedPayload, AUTH_METHOD, BAD_MAC, CIPHER_ALG};
