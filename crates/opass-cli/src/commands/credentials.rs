//! Credential command implementations

use anyhow::{Context, Result};

use crate::output::{mask, print_info, print_success, print_warning};
use opass_core::credentials;
use opass_core::ClientConfig;

/// Number of secret characters shown by `credentials show`
const VISIBLE_SECRET_CHARS: usize = 4;

/// Show the stored credential pair
pub fn credentials_show(config: &ClientConfig) -> Result<()> {
    let path = &config.credentials_path;
    let pair = credentials::read_credentials(path)
        .with_context(|| format!("Failed to read credentials from {:?}", path))?;

    match pair {
        Some(pair) => {
            print_info(&format!("Credential file: {:?}", path));
            println!("client_id:     {}", pair.client_id);
            println!(
                "shared_secret: {}",
                mask(&pair.shared_secret, VISIBLE_SECRET_CHARS)
            );
        }
        None => {
            print_warning(&format!("No credentials stored at {:?}", path));
            print_info("They are created on the first password request");
        }
    }

    Ok(())
}

/// Delete the stored credential pair
///
/// The next request registers a new client with the companion.
pub fn credentials_reset(config: &ClientConfig) -> Result<()> {
    let path = &config.credentials_path;
    credentials::remove_credentials(path)
        .with_context(|| format!("Failed to remove credentials at {:?}", path))?;

    print_success("Credentials removed; the next request will register a new client");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opass_core::CredentialPair;
    use tempfile::tempdir;

    #[test]
    fn test_reset_removes_file() {
        let dir = tempdir().unwrap();
        let config = ClientConfig {
            credentials_path: dir.path().join("credentials.json"),
            ..ClientConfig::default()
        };
        credentials::write_credentials(&config.credentials_path, &CredentialPair::generate())
            .unwrap();

        credentials_show(&config).unwrap();
        credentials_reset(&config).unwrap();
        assert!(!config.credentials_path.exists());

        // Missing file is not an error
        credentials_show(&config).unwrap();
        credentials_reset(&config).unwrap();
    }
}
