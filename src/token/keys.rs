//! Symmetric key material for the integrity and encryption wrappers.
//!
//! Key bytes are zeroized when dropped. The HMAC key and the encryption key
//! must be distinct; see [`crate::config::KeyMaterial`].

use std::fmt;

use zeroize::Zeroizing;

use crate::codec;
use crate::types::{GateError, Result};

/// Minimum accepted key length (32 bytes)
pub const MIN_KEY_LEN: usize = 32;

/// HMAC-SHA256 key (at least 32 bytes).
#[derive(Clone)]
pub struct MacKey(Zeroizing<Vec<u8>>);

impl MacKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_KEY_LEN {
            return Err(GateError::Config(format!(
                "HMAC key must be at least {MIN_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(Zeroizing::new(bytes.to_vec())))
    }

    /// Decode a base64url-encoded key.
    pub fn from_base64url(encoded: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            codec::base64url_decode(encoded.trim())
                .ok_or_else(|| GateError::Config("HMAC key is not valid base64url".into()))?,
        );
        Self::from_bytes(&bytes)
    }

    /// Generate a random key (dev mode and tests).
    pub fn generate() -> Self {
        let bytes = Zeroizing::new(codec::random_bytes::<MIN_KEY_LEN>());
        Self(Zeroizing::new(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for MacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MacKey(..)")
    }
}

/// 256-bit key for XChaCha20-Poly1305.
#[derive(Clone)]
pub struct EncryptionKey(Zeroizing<[u8; 32]>);

impl EncryptionKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; 32] = bytes.try_into().map_err(|_| {
            GateError::Config(format!(
                "Encryption key must be exactly 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(Zeroizing::new(key)))
    }

    /// Decode a base64url-encoded key.
    pub fn from_base64url(encoded: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            codec::base64url_decode(encoded.trim())
                .ok_or_else(|| GateError::Config("Encryption key is not valid base64url".into()))?,
        );
        Self::from_bytes(&bytes)
    }

    /// Generate a random key (dev mode and tests).
    pub fn generate() -> Self {
        Self(Zeroizing::new(codec::random_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}
