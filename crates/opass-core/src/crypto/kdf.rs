//! Session key derivation
//!
//! ```text
//! hash   = SHA-256(cs || cc)
//! m3     = HMAC-SHA256(secret, hash)
//! m4     = HMAC-SHA256(secret, m3)
//! encKey = HMAC-SHA256(secret, m4 || m3 || "encryption")
//! macKey = HMAC-SHA256(secret, m3 || m4 || "hmac")
//! ```
//!
//! Operand order is fixed by the companion; any change breaks interop.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Output size of SHA-256 / HMAC-SHA256
pub const KEY_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Keys and verification tokens for one authenticated session
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// AES-256-CBC key
    pub encryption_key: [u8; KEY_LEN],
    /// HMAC-SHA256 key for encrypted payloads
    pub mac_key: [u8; KEY_LEN],
    /// Token the companion proves itself with
    pub m3: [u8; KEY_LEN],
    /// Token this client proves itself with
    pub m4: [u8; KEY_LEN],
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

/// HMAC-SHA256 over the concatenation of `parts`
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; KEY_LEN], CryptoError> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Derive session keys from the shared secret and both challenges
pub fn derive(
    shared_secret: &[u8],
    client_challenge: &[u8],
    server_challenge: &[u8],
) -> Result<SessionKeys, CryptoError> {
    let mut hasher = Sha256::new();
    hasher.update(server_challenge);
    hasher.update(client_challenge);
    let hash: [u8; KEY_LEN] = hasher.finalize().into();

    let m3 = hmac_sha256(shared_secret, &[&hash])?;
    let m4 = hmac_sha256(shared_secret, &[&m3])?;
    let encryption_key = hmac_sha256(shared_secret, &[&m4, &m3, b"encryption"])?;
    let mac_key = hmac_sha256(shared_secret, &[&m3, &m4, b"hmac"])?;

    Ok(SessionKeys {
        encryption_key,
        mac_key,
        m3,
        m4,
    })
}

/// Compare two byte strings without short-circuiting on the first mismatch
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"shared-secret-for-tests";

    #[test]
    fn test_derive_is_deterministic() {
        let a = derive(SECRET, b"123456789", b"server-challenge").unwrap();
        let b = derive(SECRET, b"123456789", b"server-challenge").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_sensitive_to_each_input() {
        let base = derive(SECRET, b"123456789", b"server-challenge").unwrap();

        let other_secret = derive(b"shared-secret-for-tesTs", b"123456789", b"server-challenge");
        let other_cc = derive(SECRET, b"123456780", b"server-challenge");
        let other_cs = derive(SECRET, b"123456789", b"server-challengf");

        for other in [other_secret, other_cc, other_cs] {
            assert_ne!(other.unwrap().m3, base.m3);
        }
    }

    #[test]
    fn test_derive_chain() {
        let keys = derive(SECRET, b"42", b"cs").unwrap();

        let hash: [u8; KEY_LEN] = Sha256::digest(b"cs42").into();
        assert_eq!(keys.m3, hmac_sha256(SECRET, &[&hash]).unwrap());
        assert_eq!(keys.m4, hmac_sha256(SECRET, &[&keys.m3]).unwrap());

        let mut enc_input = Vec::new();
        enc_input.extend_from_slice(&keys.m4);
        enc_input.extend_from_slice(&keys.m3);
        enc_input.extend_from_slice(b"encryption");
        assert_eq!(keys.encryption_key, hmac_sha256(SECRET, &[&enc_input]).unwrap());

        let mut mac_input = Vec::new();
        mac_input.extend_from_slice(&keys.m3);
        mac_input.extend_from_slice(&keys.m4);
        mac_input.extend_from_slice(b"hmac");
        assert_eq!(keys.mac_key, hmac_sha256(SECRET, &[&mac_input]).unwrap());
    }

    #[test]
    fn test_challenge_order_matters() {
        let a = derive(SECRET, b"aaaa", b"bbbb").unwrap();
        let b = derive(SECRET, b"bbbb", b"aaaa").unwrap();
        assert_ne!(a.m3, b.m3);
    }

    #[test]
    fn test_hmac_rfc4231_case_2() {
        let mac = hmac_sha256(b"Jefe", &[b"what do ya want ", b"for nothing?"]).unwrap();
        let expected = [
            0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08, 0x95,
            0x75, 0xc7, 0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec, 0x58, 0xb9,
            0x64, 0xec, 0x38, 0x43,
        ];
        assert_eq!(mac, expected);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn test_debug_hides_keys() {
        let keys = derive(SECRET, b"1", b"2").unwrap();
        assert_eq!(format!("{:?}", keys), "SessionKeys { .. }");
    }
}
