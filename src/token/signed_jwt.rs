//! Signed self-contained tokens (JWS compact serialization)
//!
//! Claims: `sub`, `aud`, `exp` and an `attrs` object holding the token
//! attributes. Claims are readable by anyone holding the token.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::DateTime;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Token, TokenLookup, TokenStore};
use crate::context::RequestContext;
use crate::types::{GateError, Result};

/// `aud` may be a single string or a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub(crate) fn contains(&self, audience: &str) -> bool {
        match self {
            Self::One(aud) => aud == audience,
            Self::Many(auds) => auds.iter().any(|a| a == audience),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    aud: Audience,
    exp: i64,
    #[serde(default)]
    attrs: HashMap<String, String>,
}

pub struct SignedJwtTokenStore {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    audience: String,
}

impl SignedJwtTokenStore {
    pub fn new(
        algorithm: Algorithm,
        encoding_key: EncodingKey,
        decoding_key: DecodingKey,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            algorithm,
            encoding_key,
            decoding_key,
            audience: audience.into(),
        }
    }

    /// HS256 store with a shared secret.
    pub fn hmac(secret: &[u8], audience: impl Into<String>) -> Self {
        Self::new(
            Algorithm::HS256,
            EncodingKey::from_secret(secret),
            DecodingKey::from_secret(secret),
            audience,
        )
    }

    fn validation(&self, check_expiry: bool) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = check_expiry;
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "sub", "aud"]);
        validation
    }

    fn decode(&self, token_id: &str, check_expiry: bool) -> jsonwebtoken::errors::Result<Claims> {
        decode::<Claims>(token_id, &self.decoding_key, &self.validation(check_expiry))
            .map(|data| data.claims)
    }
}

#[async_trait]
impl TokenStore for SignedJwtTokenStore {
    async fn create(&self, _ctx: &mut RequestContext, token: &Token) -> Result<String> {
        let claims = Claims {
            sub: token.subject().to_string(),
            aud: Audience::One(self.audience.clone()),
            exp: token.expiry().timestamp(),
            attrs: token.attributes().clone(),
        };

        Ok(encode(&Header::new(self.algorithm), &claims, &self.encoding_key)?)
    }

    async fn lookup(&self, _ctx: &RequestContext, token_id: &str) -> Result<TokenLookup> {
        let claims = match self.decode(token_id, true) {
            Ok(claims) => claims,
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                // Report expiry only once every other check has passed
                return Ok(match self.decode(token_id, false) {
                    Ok(_) => TokenLookup::Expired,
                    Err(_) => TokenLookup::Missing,
                });
            }
            Err(e) => {
                debug!(error = %e, "Rejected signed token");
                return Ok(TokenLookup::Missing);
            }
        };

        if !claims.aud.contains(&self.audience) {
            return Ok(TokenLookup::Missing);
        }
        let Some(expiry) = DateTime::from_timestamp(claims.exp, 0) else {
            return Ok(TokenLookup::Missing);
        };
        let Ok(token) = Token::new(claims.sub, expiry) else {
            return Ok(TokenLookup::Missing);
        };

        Ok(TokenLookup::from_token(token.with_attributes(claims.attrs)))
    }

    async fn revoke(&self, _ctx: &mut RequestContext, _token_id: &str) -> Result<()> {
        Err(GateError::Unsupported(
            "signed tokens are stateless and cannot be revoked".into(),
        ))
    }

    fn supports_revocation(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "jwt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use hyper::{HeaderMap, Method};

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn ctx() -> RequestContext {
        RequestContext::new(Method::GET, HeaderMap::new())
    }

    #[tokio::test]
    async fn test_claims_shape() {
        let store = SignedJwtTokenStore::hmac(SECRET, "https://api.example");
        let token = Token::new("alice", Utc::now() + Duration::minutes(10))
            .unwrap()
            .with_attribute("scope", "read_message");
        let id = store.create(&mut ctx(), &token).await.unwrap();
        assert_eq!(id.split('.').count(), 3);

        let claims = store.decode(&id, true).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.exp, token.expiry().timestamp());
        assert_eq!(claims.attrs.get("scope").map(String::as_str), Some("read_message"));
    }

    #[tokio::test]
    async fn test_expired_reported_only_for_valid_audience() {
        let issuer = SignedJwtTokenStore::hmac(SECRET, "https://api.example");
        let other = SignedJwtTokenStore::hmac(SECRET, "https://other.example");
        let token = Token::new("alice", Utc::now() - Duration::minutes(10)).unwrap();
        let id = issuer.create(&mut ctx(), &token).await.unwrap();

        assert_eq!(issuer.lookup(&ctx(), &id).await.unwrap(), TokenLookup::Expired);
        assert_eq!(other.lookup(&ctx(), &id).await.unwrap(), TokenLookup::Missing);
    }

    #[tokio::test]
    async fn test_wrong_algorithm_rejected() {
        let issuer = SignedJwtTokenStore::new(
            Algorithm::HS512,
            EncodingKey::from_secret(SECRET),
            DecodingKey::from_secret(SECRET),
            "https://api.example",
        );
        let verifier = SignedJwtTokenStore::hmac(SECRET, "https://api.example");
        let token = Token::new("alice", Utc::now() + Duration::minutes(10)).unwrap();
        let id = issuer.create(&mut ctx(), &token).await.unwrap();

        assert_eq!(verifier.read(&ctx(), &id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_revoke_unsupported() {
        let store = SignedJwtTokenStore::hmac(SECRET, "https://api.example");
        assert!(!store.supports_revocation());
        assert!(matches!(
            store.revoke(&mut ctx(), "x").await,
            Err(GateError::Unsupported(_))
        ));
    }
}
