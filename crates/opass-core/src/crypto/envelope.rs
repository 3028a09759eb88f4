//! Encrypted payload envelope
//!
//! Once a session is authenticated every application payload travels as
//! `{alg, iv, data, hmac}`: AES-256-CBC (PKCS#7) over the JSON text of the
//! payload, with HMAC-SHA256 over the base64 text of `iv` followed by the
//! base64 text of `data`. Before authentication payloads pass through in
//! the clear, tagged with the client id.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde_json::Value;

use opass_protocol::{base64, EncryptedPayload, CIPHER_ALG};

use super::kdf::{constant_time_eq, hmac_sha256, SessionKeys};
use crate::error::CryptoError;

/// AES block size, which is also the IV length
pub const IV_LEN: usize = 16;

/// Key under which pre-auth payloads carry the client id
pub const CLIENT_ID_FIELD: &str = "clientId";

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Prepare an outbound payload
///
/// `keys` must be `Some` only while the session is authenticated.
pub fn protect(
    payload: Value,
    keys: Option<&SessionKeys>,
    client_id: Option<&str>,
) -> Result<Value, CryptoError> {
    match keys {
        Some(keys) => {
            let mut iv = [0u8; IV_LEN];
            rand::thread_rng().fill_bytes(&mut iv);
            seal(&payload, keys, &iv)
        }
        None => Ok(attach_client_id(payload, client_id)),
    }
}

/// Interpret an inbound payload
///
/// Plaintext payloads, and every payload received before authentication,
/// are returned unchanged. Encrypted payloads whose MAC does not verify
/// fail with [`CryptoError::Integrity`] and must be discarded.
pub fn unprotect(payload: Value, keys: Option<&SessionKeys>) -> Result<Value, CryptoError> {
    let Some(keys) = keys else {
        return Ok(payload);
    };
    let Some(sealed) = EncryptedPayload::from_value(&payload) else {
        return Ok(payload);
    };
    open(&sealed, keys)
}

/// Encrypt `payload` under `keys` with the given IV
pub fn seal(payload: &Value, keys: &SessionKeys, iv: &[u8; IV_LEN]) -> Result<Value, CryptoError> {
    let plaintext = serde_json::to_vec(payload)?;
    let ciphertext = Aes256CbcEnc::new_from_slices(&keys.encryption_key, iv)
        .map_err(|_| CryptoError::InvalidKeyLength)?
        .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

    let iv = base64::encode(iv);
    let data = base64::encode(&ciphertext);
    let hmac = base64::encode(hmac_sha256(
        &keys.mac_key,
        &[iv.as_bytes(), data.as_bytes()],
    )?);

    Ok(serde_json::to_value(EncryptedPayload {
        alg: CIPHER_ALG.to_string(),
        iv,
        data,
        hmac,
    })?)
}

/// Verify and decrypt an encrypted payload
pub fn open(sealed: &EncryptedPayload, keys: &SessionKeys) -> Result<Value, CryptoError> {
    let expected = hmac_sha256(
        &keys.mac_key,
        &[sealed.iv.as_bytes(), sealed.data.as_bytes()],
    )?;
    let received = base64::decode(&sealed.hmac).map_err(|_| CryptoError::Integrity)?;
    if !constant_time_eq(&expected, &received) {
        return Err(CryptoError::Integrity);
    }

    let iv = base64::decode(&sealed.iv).map_err(|_| CryptoError::Integrity)?;
    let ciphertext = base64::decode(&sealed.data).map_err(|_| CryptoError::Integrity)?;

    let plaintext = Aes256CbcDec::new_from_slices(&keys.encryption_key, &iv)
        .map_err(|_| CryptoError::Integrity)?
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CryptoError::Decrypt)?;

    Ok(serde_json::from_slice(&plaintext)?)
}

fn attach_client_id(mut payload: Value, client_id: Option<&str>) -> Value {
    if let (Some(id), Value::Object(map)) = (client_id, &mut payload) {
        map.entry(CLIENT_ID_FIELD)
            .or_insert_with(|| Value::String(id.to_string()));
    }
    payload
}
