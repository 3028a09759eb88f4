//! Config command implementations

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success};
use opass_core::config::{self, ClientConfig};

fn resolve_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Load the effective client configuration
///
/// A missing file yields defaults; `timeout_secs` overrides the file.
pub fn load_client_config(
    config_path: Option<&PathBuf>,
    timeout_secs: Option<u64>,
) -> Result<ClientConfig> {
    let path = resolve_path(config_path);
    let mut config: ClientConfig = config::load_or_default(&path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;

    if let Some(secs) = timeout_secs {
        config.timeout = Duration::from_secs(secs);
    }

    Ok(config)
}

/// Show the effective configuration
pub fn config_show(config_path: Option<&PathBuf>, timeout_secs: Option<u64>) -> Result<()> {
    let path = resolve_path(config_path);
    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_info(&format!("No configuration file at {:?}, showing defaults", path));
    }

    let config = load_client_config(config_path, timeout_secs)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Print the configuration file path
pub fn config_path(config_path: Option<&PathBuf>) {
    println!("{}", resolve_path(config_path).display());
}

/// Write a configuration file with default values
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = resolve_path(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    write_default_config(&path)?;
    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory: {:?}", dir))?;
    }

    let body = toml::to_string_pretty(&ClientConfig::default())?;
    let content = format!(
        "# opass configuration\n\
         # timeout is in seconds, settle_delay in milliseconds.\n\
         # variant is \"authenticated\" or \"legacy\".\n\n{}",
        body
    );

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    Ok(())
}
