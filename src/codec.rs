//! Codec and cryptographic primitives shared by the token stores.
//!
//! # Algorithms
//!
//! - **Encoding**: Base64URL without padding (RFC 4648 §5)
//! - **Digest**: SHA-256
//! - **Integrity**: HMAC-SHA256
//! - **Encryption**: XChaCha20-Poly1305 (authenticated encryption, 192-bit
//!   random nonces)
//!
//! Everything here is a pure function; keys are owned by the callers.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, Payload},
    Key, KeyInit, XChaCha20Poly1305, XNonce,
};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::types::{GateError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Nonce length for XChaCha20-Poly1305 (24 bytes)
pub const NONCE_LEN: usize = 24;

/// Poly1305 authentication tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

/// HMAC-SHA256 output length (32 bytes)
pub const MAC_LEN: usize = 32;

// =============================================================================
// Base64URL
// =============================================================================

/// Encode bytes as unpadded Base64URL.
pub fn base64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode unpadded Base64URL. Returns `None` for any malformed input.
pub fn base64url_decode(data: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(data).ok()
}

// =============================================================================
// Digests and comparison
// =============================================================================

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Constant-time equality for secret-dependent comparisons.
///
/// Length is not secret; contents are compared without early exit.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Generate cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

// =============================================================================
// HMAC-SHA256
// =============================================================================

/// Compute HMAC-SHA256 of `data` under `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; MAC_LEN]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| GateError::Internal(format!("Invalid HMAC key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Verify an HMAC-SHA256 tag in constant time.
pub fn hmac_sha256_verify(key: &[u8], data: &[u8], tag: &[u8]) -> Result<bool> {
    let expected = hmac_sha256(key, data)?;
    Ok(constant_time_eq(&expected, tag))
}

// =============================================================================
// Authenticated encryption
// =============================================================================

/// Encrypt `plaintext` with XChaCha20-Poly1305 under a fresh random nonce.
///
/// Returns `(nonce, ciphertext || tag)`.
pub fn aead_encrypt(
    key: &[u8; 32],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let nonce: [u8; NONCE_LEN] = random_bytes();
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| GateError::Internal(format!("Encryption failed: {e}")))?;

    Ok((nonce, ciphertext))
}

/// Decrypt `ciphertext || tag`. Returns `None` when authentication fails.
pub fn aead_decrypt(key: &[u8; 32], nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> Option<Vec<u8>> {
    if nonce.len() != NONCE_LEN || ciphertext.len() < AUTH_TAG_LEN {
        return None;
    }

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .ok()
}

/// Seal `plaintext` into a self-describing box: `base64url(nonce || ciphertext || tag)`.
pub fn seal_box(key: &[u8; 32], plaintext: &[u8]) -> Result<String> {
    let (nonce, ciphertext) = aead_encrypt(key, plaintext, &[])?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(base64url_encode(&sealed))
}

/// Open a box produced by [`seal_box`]. Any malformed or tampered box yields `None`.
pub fn open_box(key: &[u8; 32], sealed: &str) -> Option<Vec<u8>> {
    let bytes = base64url_decode(sealed)?;
    if bytes.len() < NONCE_LEN + AUTH_TAG_LEN {
        return None;
    }
    let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
    aead_decrypt(key, nonce, ciphertext, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];

    #[test]
    fn test_base64url_has_no_padding() {
        let encoded = base64url_encode(&[0xfb, 0xff, 0xfe]);
        assert_eq!(encoded, "-__-");
        assert!(!base64url_encode(&[1, 2]).contains('='));
        assert_eq!(base64url_decode("-__-"), Some(vec![0xfb, 0xff, 0xfe]));
    }

    #[test]
    fn test_base64url_rejects_garbage() {
        assert_eq!(base64url_decode("not base64!"), None);
        assert_eq!(base64url_decode("abc="), None);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"same", b"same"));
        assert!(!constant_time_eq(b"same", b"samf"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }

    #[test]
    fn test_random_bytes_differ() {
        let a: [u8; 20] = random_bytes();
        let b: [u8; 20] = random_bytes();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hmac_verify() {
        let tag = hmac_sha256(&KEY, b"token-id").unwrap();
        assert!(hmac_sha256_verify(&KEY, b"token-id", &tag).unwrap());
        assert!(!hmac_sha256_verify(&KEY, b"token-ie", &tag).unwrap());
        assert!(!hmac_sha256_verify(&[8u8; 32], b"token-id", &tag).unwrap());
    }

    #[test]
    fn test_box_seal_open() {
        let sealed = seal_box(&KEY, b"inner-id").unwrap();
        assert_eq!(open_box(&KEY, &sealed), Some(b"inner-id".to_vec()));
        assert_eq!(open_box(&[9u8; 32], &sealed), None);
    }

    #[test]
    fn test_box_uses_fresh_nonce() {
        let a = seal_box(&KEY, b"inner-id").unwrap();
        let b = seal_box(&KEY, b"inner-id").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_open_box_rejects_truncated() {
        let sealed = seal_box(&KEY, b"x").unwrap();
        assert_eq!(open_box(&KEY, &sealed[..20]), None);
        assert_eq!(open_box(&KEY, ""), None);
    }

    #[test]
    fn test_aead_checks_aad() {
        let (nonce, ct) = aead_encrypt(&KEY, b"claims", b"header").unwrap();
        assert_eq!(aead_decrypt(&KEY, &nonce, &ct, b"header"), Some(b"claims".to_vec()));
        assert_eq!(aead_decrypt(&KEY, &nonce, &ct, b"other"), None);
    }
}
