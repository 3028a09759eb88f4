//! Core error types for opass

use opass_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the opass client
#[derive(Error, Debug)]
pub enum OpassError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Cryptographic error
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handshake errors
#[derive(Error, Debug)]
pub enum AuthError {
    /// `authContinue` arrived without a pending client challenge
    #[error("No authentication attempt in progress")]
    NoPendingChallenge,

    /// Handshake message could not be interpreted
    #[error("Invalid handshake message: {0}")]
    Protocol(#[from] ProtocolError),

    /// Key derivation failed
    #[error("Key derivation failed: {0}")]
    Crypto(#[from] CryptoError),
}

/// Session crypto errors
#[derive(Error, Debug)]
pub enum CryptoError {
    /// MAC over an encrypted payload did not verify
    #[error("Bad data")]
    Integrity,

    /// Ciphertext verified but did not decrypt to valid padding
    #[error("Decryption failed")]
    Decrypt,

    /// Key material had the wrong length
    #[error("Invalid key length")]
    InvalidKeyLength,

    /// Decrypted plaintext is not valid JSON
    #[error("Invalid plaintext: {0}")]
    Plaintext(#[from] serde_json::Error),
}

/// Application request errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No terminal event before the deadline
    #[error("Timeout")]
    Timeout,

    /// The returned item has no field named `password`
    #[error("No password")]
    NoPasswordField,

    /// `authFail` observed before the session became ready
    #[error("Connection rejected: {0}")]
    ConnectionRejected(String),

    /// Operation requires an open connection
    #[error("Not connected")]
    NotConnected,

    /// The transport closed while an operation was pending
    #[error("Transport closed")]
    TransportClosed,

    /// The request could not be encoded for sending
    #[error("Could not encode request: {0}")]
    Encoding(String),
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not open the channel
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The channel is closed
    #[error("Channel closed")]
    Closed,

    /// Failure on an open channel
    #[error("Transport failure: {0}")]
    Other(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
