//! Password command implementation

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;

use crate::client::SessionClient;
use crate::output::{print_info, print_verification_code};
use opass_core::{credentials, ClientConfig, Connector};

/// Fetch the password for `url`, printing verification codes as they come
pub async fn fetch_password<C: Connector>(client: &SessionClient<C>, url: &str) -> Result<String> {
    let mut codes = client.verification_codes();
    let printer = tokio::spawn(async move {
        loop {
            match codes.recv().await {
                Ok(code) => print_verification_code(&code),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let result = client.password(url).await;
    printer.abort();

    result.with_context(|| format!("Failed to get password for {}", url))
}

/// `opass password <url>`
pub async fn password_command(config: ClientConfig, url: &str) -> Result<()> {
    let (pair, created) =
        credentials::load_or_create(&config.credentials_path).with_context(|| {
            format!("Failed to load credentials from {:?}", config.credentials_path)
        })?;
    if created {
        print_info(
            "New client credentials created; the password manager will ask you to approve them",
        );
    }

    let client = SessionClient::websocket(config, pair);
    let result = fetch_password(&client, url).await;
    client.close().await;

    println!("{}", result?);
    Ok(())
}
