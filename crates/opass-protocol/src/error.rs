//! Protocol error types

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Inbound envelope could not be decoded
    #[error("Malformed message: {0}")]
    MalformedMessage(#[source] serde_json::Error),

    /// Envelope decoded but its payload does not match the action
    #[error("Invalid {action} payload: {reason}")]
    InvalidPayload { action: String, reason: String },

    /// A base64 value from the peer could not be decoded
    #[error("Invalid base64 value: {0}")]
    InvalidBase64(#[from] ::base64::DecodeError),

    /// Outbound serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
