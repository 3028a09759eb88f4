//! Message types for the opass companion protocol
//!
//! Every message is a JSON envelope naming an `action` and carrying a
//! `payload`. This module defines the closed set of action names and the
//! typed payload of each action.
//!
//! # Message Flow
//!
//! Typical sequence for a client the companion has not seen before:
//!
//! 1. Client sends `hello` advertising the auth method and cipher
//! 2. Companion answers `welcome` (no `alg` yet) and `authNew` with a code
//! 3. Client sends `authRegister` with its shared secret
//! 4. Companion answers `authRegistered`; client sends `authBegin` with `cc`
//! 5. Companion answers `authContinue` with `cs` and `M3`
//! 6. Client verifies `M3` and sends `authVerify` with `M4`
//! 7. Companion answers `welcome` with `alg`; the session is encrypted
//! 8. Application traffic: `showPopup` out, `fillItem` back

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Name of the single supported authentication method
pub const AUTH_METHOD: &str = "auth-sma-hmac256";

/// Name of the single supported symmetric cipher suite
pub const CIPHER_ALG: &str = "aead-cbchmac-256";

/// `authFail` reason for a verification token mismatch
pub const BAD_MAC: &str = "bad-mac";

/// Protocol action carried in the envelope's `action` field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    /// Client greeting (outbound)
    Hello,
    /// Register the shared secret (outbound)
    AuthRegister,
    /// Start a challenge exchange (both directions)
    AuthBegin,
    /// Prove possession of the secret with `M4` (outbound)
    AuthVerify,
    /// Reject a verification token (both directions)
    AuthFail,
    /// Ask the companion to show its item picker (outbound)
    ShowPopup,
    /// Companion greeting, with `alg` once the handshake is complete
    Welcome,
    /// Companion does not know this client and shows a code
    AuthNew,
    /// Companion accepted the shared secret
    AuthRegistered,
    /// Server challenge and `M3`
    AuthContinue,
    /// Item chosen by the user
    FillItem,
    /// Any action name this client does not recognize
    Unknown(String),
}

impl Action {
    /// Wire name of this action
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hello => "hello",
            Self::AuthRegister => "authRegister",
            Self::AuthBegin => "authBegin",
            Self::AuthVerify => "authVerify",
            Self::AuthFail => "authFail",
            Self::ShowPopup => "showPopup",
            Self::Welcome => "welcome",
            Self::AuthNew => "authNew",
            Self::AuthRegistered => "authRegistered",
            Self::AuthContinue => "authContinue",
            Self::FillItem => "fillItem",
            Self::Unknown(name) => name,
        }
    }

    /// Parse a wire name
    pub fn from_name(name: &str) -> Self {
        match name {
            "hello" => Self::Hello,
            "authRegister" => Self::AuthRegister,
            "authBegin" => Self::AuthBegin,
            "authVerify" => Self::AuthVerify,
            "authFail" => Self::AuthFail,
            "showPopup" => Self::ShowPopup,
            "welcome" => Self::Welcome,
            "authNew" => Self::AuthNew,
            "authRegistered" => Self::AuthRegistered,
            "authContinue" => Self::AuthContinue,
            "fillItem" => Self::FillItem,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Whether this action belongs to the authentication handshake
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            Self::Welcome
                | Self::AuthNew
                | Self::AuthRegistered
                | Self::AuthBegin
                | Self::AuthContinue
                | Self::AuthFail
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

/// `hello` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Client version string
    pub version: String,
    /// `[method, alg]`; omitted by the legacy variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
}

/// `authRegister` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRegisterPayload {
    pub method: String,
    /// Shared secret in the peer's base64 dialect
    pub secret: String,
}

/// `authBegin` payload (outbound)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthBeginPayload {
    #[serde(rename = "extId")]
    pub ext_id: String,
    pub method: String,
    pub alg: String,
    /// Client challenge in the peer's base64 dialect
    pub cc: String,
}

/// `authVerify` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthVerifyPayload {
    pub method: String,
    #[serde(rename = "M4")]
    pub m4: String,
}

/// `authFail` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFailPayload {
    #[serde(default)]
    pub reason: String,
}

/// `showPopup` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowPopupPayload {
    pub url: String,
    pub options: PopupOptions,
}

/// Options attached to `showPopup`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupOptions {
    pub source: String,
}

impl Default for PopupOptions {
    fn default() -> Self {
        Self {
            source: "toolbar-button".to_string(),
        }
    }
}

/// `welcome` payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomePayload {
    /// Present only once the companion considers the handshake complete
    #[serde(default)]
    pub alg: Option<String>,
}

/// `authNew` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthNewPayload {
    /// Out-of-band verification code shown to the user
    #[serde(deserialize_with = "string_or_number")]
    pub code: String,
}

/// `authContinue` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContinuePayload {
    pub cs: String,
    #[serde(rename = "M3")]
    pub m3: String,
}

/// `fillItem` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillItemPayload {
    pub item: Item,
}

/// Vault item delivered by `fillItem`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(default)]
    pub secure_contents: Option<SecureContents>,
    #[serde(default)]
    pub fields: Vec<ItemField>,
}

/// Secret part of an item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecureContents {
    #[serde(default)]
    pub fields: Vec<ItemField>,
}

/// Named field of an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemField {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl Item {
    /// Look up a field by name, secure contents first
    pub fn field(&self, name: &str) -> Option<&ItemField> {
        self.secure_contents
            .iter()
            .flat_map(|contents| contents.fields.iter())
            .chain(self.fields.iter())
            .find(|field| field.name == name)
    }
}

/// Encrypted payload sub-object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub alg: String,
    pub iv: String,
    pub data: String,
    pub hmac: String,
}

impl EncryptedPayload {
    /// Extract the four encrypted fields if all of them are present
    pub fn from_value(value: &Value) -> Option<Self> {
        let field = |name: &str| value.get(name)?.as_str().map(str::to_string);
        Some(Self {
            alg: field("alg")?,
            iv: field("iv")?,
            data: field("data")?,
            hmac: field("hmac")?,
        })
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
