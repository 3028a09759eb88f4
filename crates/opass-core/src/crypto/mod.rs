//! Session cryptography
//!
//! Key derivation for the challenge-response handshake and the encrypted
//! envelope used for application messages once a session is authenticated.

pub mod envelope;
pub mod kdf;

pub use envelope::{protect, unprotect};
pub use kdf::{derive, SessionKeys};
