//! HMAC integrity wrapper
//!
//! Wire format: `inner_id '.' base64url(HMAC-SHA256(key, inner_id))`.
//! The tag is checked before the inner store is consulted, so forged
//! identifiers never reach the database.

use async_trait::async_trait;
use tracing::debug;

use super::{MacKey, Token, TokenLookup, TokenStore};
use crate::codec;
use crate::context::RequestContext;
use crate::types::Result;

pub struct HmacTokenStore {
    inner: Box<dyn TokenStore>,
    key: MacKey,
}

impl HmacTokenStore {
    pub fn new(inner: Box<dyn TokenStore>, key: MacKey) -> Self {
        Self { inner, key }
    }

    fn tag(&self, inner_id: &str) -> Result<String> {
        let tag = codec::hmac_sha256(self.key.as_bytes(), inner_id.as_bytes())?;
        Ok(codec::base64url_encode(&tag))
    }

    /// Split off and verify the tag, returning the inner identifier.
    ///
    /// Splits on the last '.' since inner identifiers (JWTs) may contain dots.
    fn verify<'a>(&self, token_id: &'a str) -> Result<Option<&'a str>> {
        let Some((inner_id, tag)) = token_id.rsplit_once('.') else {
            return Ok(None);
        };
        let Some(tag) = codec::base64url_decode(tag) else {
            return Ok(None);
        };

        let valid = codec::hmac_sha256_verify(self.key.as_bytes(), inner_id.as_bytes(), &tag)?;
        Ok(valid.then_some(inner_id))
    }
}

#[async_trait]
impl TokenStore for HmacTokenStore {
    async fn create(&self, ctx: &mut RequestContext, token: &Token) -> Result<String> {
        let inner_id = self.inner.create(ctx, token).await?;
        let tag = self.tag(&inner_id)?;
        Ok(format!("{inner_id}.{tag}"))
    }

    async fn lookup(&self, ctx: &RequestContext, token_id: &str) -> Result<TokenLookup> {
        match self.verify(token_id)? {
            Some(inner_id) => self.inner.lookup(ctx, inner_id).await,
            None => {
                debug!("Token tag mismatch");
                Ok(TokenLookup::Missing)
            }
        }
    }

    async fn revoke(&self, ctx: &mut RequestContext, token_id: &str) -> Result<()> {
        match self.verify(token_id)? {
            Some(inner_id) => self.inner.revoke(ctx, inner_id).await,
            None => Ok(()),
        }
    }

    fn supports_revocation(&self) -> bool {
        self.inner.supports_revocation()
    }

    fn name(&self) -> &'static str {
        "hmac"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryTokenRepository;
    use crate::token::DatabaseTokenStore;
    use chrono::{Duration, Utc};
    use hyper::{HeaderMap, Method};
    use std::sync::Arc;

    fn store() -> HmacTokenStore {
        let inner = DatabaseTokenStore::new(Arc::new(InMemoryTokenRepository::new()));
        HmacTokenStore::new(Box::new(inner), MacKey::generate())
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Method::POST, HeaderMap::new())
    }

    #[tokio::test]
    async fn test_wire_format() {
        let store = store();
        let token = Token::new("alice", Utc::now() + Duration::minutes(10)).unwrap();
        let id = store.create(&mut ctx(), &token).await.unwrap();

        let (base, tag) = id.rsplit_once('.').unwrap();
        assert_eq!(base.len(), 27);
        assert_eq!(codec::base64url_decode(tag).unwrap().len(), codec::MAC_LEN);
        assert_eq!(store.read(&ctx(), &id).await.unwrap(), Some(token));
    }

    #[tokio::test]
    async fn test_missing_separator_rejected() {
        let store = store();
        assert_eq!(store.lookup(&ctx(), "no-separator").await.unwrap(), TokenLookup::Missing);
        assert_eq!(store.lookup(&ctx(), "bad.!!!").await.unwrap(), TokenLookup::Missing);
    }

    #[tokio::test]
    async fn test_other_key_rejected() {
        let issuer = store();
        let verifier = store();
        let token = Token::new("alice", Utc::now() + Duration::minutes(10)).unwrap();
        let id = issuer.create(&mut ctx(), &token).await.unwrap();
        assert_eq!(verifier.read(&ctx(), &id).await.unwrap(), None);
    }
}
