//! Encrypted self-contained tokens (JWE compact serialization)
//!
//! Direct symmetric encryption with XChaCha20-Poly1305:
//!
//! ```text
//! base64url(header) . "" . base64url(nonce) . base64url(ciphertext) . base64url(tag)
//! ```
//!
//! The protected header is `{"alg":"dir","enc":"XC20P"}` and its encoded form
//! is the additional authenticated data. The claims are `sub`, `aud`, `exp`
//! plus one string claim per token attribute.

use async_trait::async_trait;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::signed_jwt::Audience;
use super::{EncryptionKey, Token, TokenLookup, TokenStore};
use crate::codec::{self, AUTH_TAG_LEN};
use crate::context::RequestContext;
use crate::types::{GateError, Result};

const ALG_DIRECT: &str = "dir";
const ENC_XC20P: &str = "XC20P";

/// Claim names that never become attributes
const RESERVED_CLAIMS: [&str; 3] = ["sub", "aud", "exp"];

#[derive(Debug, Serialize, Deserialize)]
struct JweHeader {
    alg: String,
    enc: String,
}

pub struct EncryptedJwtTokenStore {
    key: EncryptionKey,
    audience: String,
}

impl EncryptedJwtTokenStore {
    pub fn new(key: EncryptionKey, audience: impl Into<String>) -> Self {
        Self {
            key,
            audience: audience.into(),
        }
    }

    fn encrypt(&self, claims: &Map<String, Value>) -> Result<String> {
        let header = serde_json::to_vec(&JweHeader {
            alg: ALG_DIRECT.into(),
            enc: ENC_XC20P.into(),
        })?;
        let header = codec::base64url_encode(&header);
        let plaintext = serde_json::to_vec(claims)?;

        let (nonce, sealed) = codec::aead_encrypt(self.key.as_bytes(), &plaintext, header.as_bytes())?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - AUTH_TAG_LEN);

        Ok(format!(
            "{}..{}.{}.{}",
            header,
            codec::base64url_encode(&nonce),
            codec::base64url_encode(ciphertext),
            codec::base64url_encode(tag),
        ))
    }

    fn decrypt(&self, token_id: &str) -> Option<Map<String, Value>> {
        let mut parts = token_id.split('.');
        let (Some(header), Some(""), Some(nonce), Some(ciphertext), Some(tag), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return None;
        };

        let parsed: JweHeader = serde_json::from_slice(&codec::base64url_decode(header)?).ok()?;
        if parsed.alg != ALG_DIRECT || parsed.enc != ENC_XC20P {
            return None;
        }

        let nonce = codec::base64url_decode(nonce)?;
        let mut sealed = codec::base64url_decode(ciphertext)?;
        let tag = codec::base64url_decode(tag)?;
        if tag.len() != AUTH_TAG_LEN {
            return None;
        }
        sealed.extend_from_slice(&tag);

        let plaintext = codec::aead_decrypt(self.key.as_bytes(), &nonce, &sealed, header.as_bytes())?;
        serde_json::from_slice(&plaintext).ok()
    }

    /// Rebuild a token from decrypted claims. Malformed claims yield `None`.
    fn token_from_claims(&self, mut claims: Map<String, Value>) -> Option<Token> {
        let audience: Audience = serde_json::from_value(claims.remove("aud")?).ok()?;
        if !audience.contains(&self.audience) {
            return None;
        }

        let expiry = DateTime::from_timestamp(claims.remove("exp")?.as_i64()?, 0)?;
        let subject = match claims.remove("sub")? {
            Value::String(sub) => sub,
            _ => return None,
        };

        let mut token = Token::new(subject, expiry).ok()?;
        for (name, value) in claims {
            match value {
                Value::String(value) => token = token.with_attribute(name, value),
                _ => return None,
            }
        }
        Some(token)
    }
}

#[async_trait]
impl TokenStore for EncryptedJwtTokenStore {
    async fn create(&self, _ctx: &mut RequestContext, token: &Token) -> Result<String> {
        let mut claims = Map::new();
        for (name, value) in token.attributes() {
            if !RESERVED_CLAIMS.contains(&name.as_str()) {
                claims.insert(name.clone(), Value::String(value.clone()));
            }
        }
        claims.insert("sub".into(), Value::String(token.subject().to_string()));
        claims.insert("aud".into(), Value::String(self.audience.clone()));
        claims.insert("exp".into(), Value::from(token.expiry().timestamp()));

        self.encrypt(&claims)
    }

    async fn lookup(&self, _ctx: &RequestContext, token_id: &str) -> Result<TokenLookup> {
        let token = self
            .decrypt(token_id)
            .and_then(|claims| self.token_from_claims(claims));

        Ok(match token {
            Some(token) => TokenLookup::from_token(token),
            None => {
                debug!("Rejected encrypted token");
                TokenLookup::Missing
            }
        })
    }

    async fn revoke(&self, _ctx: &mut RequestContext, _token_id: &str) -> Result<()> {
        Err(GateError::Unsupported(
            "encrypted tokens are stateless and cannot be revoked".into(),
        ))
    }

    fn supports_revocation(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "encrypted-jwt"
    }
}
