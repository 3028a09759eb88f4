//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use opass_protocol::EnvelopeCodec;

use super::serde_utils::{duration_millis, duration_secs};

/// Companion protocol variant
///
/// The companion has shipped two dialects of the same protocol. The legacy
/// one sends the bundle identifier in every envelope and skips the
/// handshake entirely; the current one runs the authenticated handshake
/// and encrypts application traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    /// Authenticated handshake, encrypted application messages
    #[default]
    Authenticated,
    /// Plaintext protocol with `bundleId` in the envelope
    Legacy,
}

impl ProtocolVariant {
    /// Whether this variant runs the authentication handshake
    pub fn requires_handshake(&self) -> bool {
        matches!(self, Self::Authenticated)
    }

    /// Client version advertised in `hello` when none is configured
    pub fn default_client_version(&self) -> &'static str {
        match self {
            Self::Authenticated => "4.7.2.90",
            Self::Legacy => "4.2.4.90",
        }
    }
}

/// Configuration for the companion client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket address of the companion process
    pub address: String,

    /// Value of the `Origin` header sent when connecting
    pub origin: String,

    /// Deadline for `connect` and for each application request
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Delay between `authRegistered` and the next `authBegin`
    #[serde(with = "duration_millis")]
    pub settle_delay: Duration,

    /// Protocol dialect spoken by the companion
    pub variant: ProtocolVariant,

    /// Envelope `version` field
    pub protocol_version: String,

    /// Client version sent in `hello` (defaults per variant)
    pub client_version: Option<String>,

    /// Companion bundle identifier (sent by the legacy variant only)
    pub bundle_id: String,

    /// Where the credential pair is persisted
    pub credentials_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "ws://127.0.0.1:6263/4".to_string(),
            origin: "chrome-extension://aomjjhallfgjeglblehebfpbcfeobpgk".to_string(),
            timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(500),
            variant: ProtocolVariant::default(),
            protocol_version: "4".to_string(),
            client_version: None,
            bundle_id: "com.github.sibartlett.onepass".to_string(),
            credentials_path: super::default_config_dir().join("credentials.json"),
        }
    }
}

impl ClientConfig {
    /// Client version for `hello`, falling back to the variant default
    pub fn client_version(&self) -> String {
        self.client_version
            .clone()
            .unwrap_or_else(|| self.variant.default_client_version().to_string())
    }

    /// Bundle identifier to put in envelopes, if the variant sends one
    pub fn envelope_bundle_id(&self) -> Option<String> {
        match self.variant {
            ProtocolVariant::Legacy => Some(self.bundle_id.clone()),
            ProtocolVariant::Authenticated => None,
        }
    }

    /// Fresh codec for one transport connection
    pub fn codec(&self) -> EnvelopeCodec {
        EnvelopeCodec::new(self.protocol_version.clone(), self.envelope_bundle_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.address, "ws://127.0.0.1:6263/4");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.settle_delay, Duration::from_millis(500));
        assert!(config.variant.requires_handshake());
    }

    #[test]
    fn test_bundle_id_only_for_legacy() {
        let mut config = ClientConfig::default();
        assert_eq!(config.envelope_bundle_id(), None);

        config.variant = ProtocolVariant::Legacy;
        assert_eq!(
            config.envelope_bundle_id().as_deref(),
            Some("com.github.sibartlett.onepass")
        );
    }

    #[test]
    fn test_client_version_override() {
        let mut config = ClientConfig::default();
        assert_eq!(config.client_version(), "4.7.2.90");

        config.client_version = Some("9.9".to_string());
        assert_eq!(config.client_version(), "9.9");
    }
}
