//! Credential pair management
//!
//! The companion remembers a client by its `client_id` and the shared
//! secret registered alongside it. Losing the pair means the user has to
//! approve a new registration code, so the CLI persists it in a small JSON
//! file next to the configuration.
//!
//! # Security Model
//!
//! - Both values are 16 bytes of cryptographically random data, rendered
//!   in the companion's base64 dialect
//! - The file has mode 0600 (owner read/write only) on Unix
//! - The protocol core never touches the file; it only consumes the pair

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use opass_protocol::base64;

/// Length of each random credential value in bytes (before encoding)
const CREDENTIAL_BYTES: usize = 16;

/// Client identity and long-term secret shared with the companion
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    /// Identifier the companion files this client under
    pub client_id: String,
    /// Long-term secret; its UTF-8 bytes key every handshake HMAC
    pub shared_secret: String,
}

impl CredentialPair {
    /// Create a pair from existing values
    pub fn new(client_id: impl Into<String>, shared_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            shared_secret: shared_secret.into(),
        }
    }

    /// Generate a fresh random pair
    pub fn generate() -> Self {
        Self {
            client_id: random_value(),
            shared_secret: random_value(),
        }
    }

    /// Shared secret bytes used as HMAC key
    pub fn secret_bytes(&self) -> &[u8] {
        self.shared_secret.as_bytes()
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("client_id", &self.client_id)
            .field("shared_secret", &"<redacted>")
            .finish()
    }
}

fn random_value() -> String {
    let mut bytes = [0u8; CREDENTIAL_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::encode(bytes)
}

/// Read a credential pair
///
/// Returns `Ok(None)` if the file doesn't exist or is not valid JSON.
pub fn read_credentials(path: &Path) -> io::Result<Option<CredentialPair>> {
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<CredentialPair>(&contents) {
            Ok(pair) => Ok(Some(pair)),
            Err(_) => {
                tracing::warn!("Credential file {:?} is not valid JSON, ignoring it", path);
                Ok(None)
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write a credential pair
///
/// Creates the parent directory if it doesn't exist.
/// Sets file permissions to 0600 (owner read/write only) on Unix.
pub fn write_credentials(path: &Path, pair: &CredentialPair) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(pair)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    fs::write(path, json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = fs::Permissions::from_mode(0o600);
        fs::set_permissions(path, permissions)?;
    }

    Ok(())
}

/// Load the stored pair, generating and persisting a new one if absent
///
/// The boolean is `true` when a new pair was created.
pub fn load_or_create(path: &Path) -> io::Result<(CredentialPair, bool)> {
    if let Some(pair) = read_credentials(path)? {
        tracing::debug!(client_id = %pair.client_id, "Loaded stored credentials");
        return Ok((pair, false));
    }

    let pair = CredentialPair::generate();
    write_credentials(path, &pair)?;
    tracing::info!(client_id = %pair.client_id, "Generated new client credentials");
    Ok((pair, true))
}

/// Remove the credential file
///
/// Ignores errors if the file doesn't exist.
pub fn remove_credentials(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("Removed credential file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
