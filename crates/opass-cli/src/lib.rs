//! opass: Command-line client for the password manager companion
//!
//! Provides the session client that drives the companion protocol over a
//! transport, the WebSocket transport itself, and the `opass` CLI commands.

pub mod client;
pub mod commands;
pub mod output;
pub mod transport;

pub use client::SessionClient;
