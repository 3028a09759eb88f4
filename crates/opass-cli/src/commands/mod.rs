//! CLI command implementations

mod config;
mod credentials;
mod password;

pub use config::{config_init, config_path, config_show, load_client_config};
pub use credentials::{credentials_reset, credentials_show};
pub use password::{fetch_password, password_command};
