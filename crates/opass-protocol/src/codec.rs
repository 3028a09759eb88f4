//! Envelope codec for protocol messages
//!
//! Outbound envelopes carry `action`, a per-connection sequence `number`,
//! the protocol `version`, an optional `bundleId` (legacy variant) and the
//! `payload`. Inbound envelopes only need `action` and `payload`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::message::Action;

/// Envelope as written to the transport
#[derive(Debug, Serialize)]
struct OutboundEnvelope<'a> {
    action: &'a Action,
    number: u64,
    version: &'a str,
    #[serde(rename = "bundleId", skip_serializing_if = "Option::is_none")]
    bundle_id: Option<&'a str>,
    payload: &'a Value,
}

/// Envelope as read from the transport
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundEnvelope {
    /// Action name
    pub action: Action,
    /// Opaque payload (possibly encrypted)
    #[serde(default)]
    pub payload: Value,
}

impl InboundEnvelope {
    /// Create an envelope, mostly useful for tests and in-memory peers
    pub fn new(action: Action, payload: Value) -> Self {
        Self { action, payload }
    }

    /// Deserialize the payload into its typed form
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| ProtocolError::InvalidPayload {
            action: self.action.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Codec for encoding/decoding protocol envelopes
///
/// One codec is created per transport connection; it owns the outbound
/// sequence counter, which starts at zero and increases by one per message.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    /// Sequence number for the next outbound envelope
    next_number: u64,
    /// Protocol version string sent with every envelope
    version: String,
    /// Companion bundle identifier (legacy variant only)
    bundle_id: Option<String>,
}

impl EnvelopeCodec {
    /// Create a new codec
    pub fn new(version: impl Into<String>, bundle_id: Option<String>) -> Self {
        Self {
            next_number: 0,
            version: version.into(),
            bundle_id,
        }
    }

    /// Sequence number the next encoded envelope will carry
    pub fn next_number(&self) -> u64 {
        self.next_number
    }

    /// Protocol version string
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Encode an outbound envelope and advance the sequence counter
    pub fn encode(&mut self, action: &Action, payload: &Value) -> Result<String, ProtocolError> {
        let envelope = OutboundEnvelope {
            action,
            number: self.next_number,
            version: &self.version,
            bundle_id: self.bundle_id.as_deref(),
            payload,
        };
        let text = serde_json::to_string(&envelope)?;
        self.next_number += 1;
        Ok(text)
    }

    /// Decode an inbound envelope
    pub fn decode(&self, text: &str) -> Result<InboundEnvelope, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::MalformedMessage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_envelope_fields() {
        let mut codec = EnvelopeCodec::new("4", None);
        let text = codec
            .encode(&Action::Hello, &json!({"version": "1.0"}))
            .unwrap();

        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({
                "action": "hello",
                "number": 0,
                "version": "4",
                "payload": {"version": "1.0"}
            })
        );
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut codec = EnvelopeCodec::new("4", None);
        for expected in 0..5u64 {
            let text = codec.encode(&Action::ShowPopup, &json!({})).unwrap();
            let value: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["number"], json!(expected));
        }
        assert_eq!(codec.next_number(), 5);
    }

    #[test]
    fn test_bundle_id_included_when_set() {
        let mut codec = EnvelopeCodec::new("4", Some("com.example.app".to_string()));
        let text = codec.encode(&Action::Hello, &Value::Null).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["bundleId"], json!("com.example.app"));
    }

    #[test]
    fn test_decode_inbound() {
        let codec = EnvelopeCodec::new("4", None);
        let envelope = codec
            .decode(r#"{"action":"authNew","payload":{"code":"1234"}}"#)
            .unwrap();
        assert_eq!(envelope.action, Action::AuthNew);
        assert_eq!(envelope.payload, json!({"code": "1234"}));
    }

    #[test]
    fn test_decode_missing_payload_defaults_to_null() {
        let codec = EnvelopeCodec::new("4", None);
        let envelope = codec.decode(r#"{"action":"authRegistered"}"#).unwrap();
        assert_eq!(envelope.action, Action::AuthRegistered);
        assert!(envelope.payload.is_null());
    }

    #[test]
    fn test_decode_malformed() {
        let codec = EnvelopeCodec::new("4", None);
        assert!(matches!(
            codec.decode("not json"),
            Err(ProtocolError::MalformedMessage(_))
        ));
        assert!(matches!(
            codec.decode(r#"{"payload":{}}"#),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_payload_as_reports_action() {
        let envelope = InboundEnvelope::new(Action::AuthContinue, json!({"cs": 1}));
        let err = envelope
            .payload_as::<crate::message::AuthContinuePayload>()
            .unwrap_err();
        assert!(err.to_string().contains("authContinue"));
    }
}
