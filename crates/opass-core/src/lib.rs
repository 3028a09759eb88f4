//! opass-core: Handshake, session crypto and configuration for opass
//!
//! This crate provides the authentication state machine, the encrypted
//! payload envelope, credential storage and the transport abstraction used
//! by the session client in the CLI crate.

pub mod auth;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod transport;

pub use auth::{AuthAction, AuthMachine, ConnectionState};
pub use config::{ClientConfig, ProtocolVariant};
pub use credentials::CredentialPair;
pub use error::OpassError;
pub use transport::{Connector, Transport};
