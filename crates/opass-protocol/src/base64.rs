//! Base64 dialect used by the companion process
//!
//! The peer takes standard base64 and rewrites it: `/` becomes `_`, `+`
//! becomes `|`, `-` becomes `+`, then any remaining `|` becomes `-`, and the
//! `=` padding is stripped. Standard base64 never emits `-`, so the net
//! effect is the URL-safe alphabet without padding. Every binary value on
//! the wire (challenges, MACs, IVs, ciphertext, the shared secret) uses it.

use ::base64::alphabet;
use ::base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use ::base64::engine::DecodePaddingMode;
use ::base64::Engine;

use crate::error::ProtocolError;

/// URL-safe alphabet, no padding on encode, padding tolerated on decode
const PEER_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode bytes in the peer's base64 dialect
pub fn encode(input: impl AsRef<[u8]>) -> String {
    PEER_ENGINE.encode(input)
}

/// Decode a value produced by [`encode`] (or by the peer)
pub fn decode(input: &str) -> Result<Vec<u8>, ProtocolError> {
    Ok(PEER_ENGINE.decode(input.trim())?)
}
