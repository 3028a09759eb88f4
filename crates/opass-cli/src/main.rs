//! opass CLI
//!
//! Fetches passwords from the locally running password manager through its
//! browser-extension companion protocol.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opass::commands;
use opass::output::print_error;

#[derive(Parser)]
#[command(name = "opass")]
#[command(author, version, about = "Password manager companion client")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "OPASS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Request timeout in seconds (overrides config)
    #[arg(short, long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the password of the item matching a URL
    Password {
        /// URL the password manager should match items against
        url: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage the client credentials registered with the password manager
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show config file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum CredentialsAction {
    /// Show the stored client id
    Show,
    /// Forget the stored credentials
    Reset,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Password { url } => {
            let config = commands::load_client_config(config_path, cli.timeout)?;
            commands::password_command(config, &url).await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(config_path, cli.timeout)?,
            ConfigAction::Path => commands::config_path(config_path),
            ConfigAction::Init { force } => commands::config_init(config_path, force)?,
        },

        Commands::Credentials { action } => {
            let config = commands::load_client_config(config_path, cli.timeout)?;
            match action {
                CredentialsAction::Show => commands::credentials_show(&config)?,
                CredentialsAction::Reset => commands::credentials_reset(&config)?,
            }
        }
    }

    Ok(())
}
