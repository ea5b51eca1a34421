//! Hashed opaque token store
//!
//! Identifiers are 160 random bits. Only `base64url(SHA-256(id))` is
//! persisted, so a leaked token table cannot be replayed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use super::{Token, TokenLookup, TokenStore};
use crate::codec;
use crate::context::RequestContext;
use crate::db::{TokenRecord, TokenRepository};
use crate::types::Result;

/// Identifier entropy (160 bits)
const TOKEN_ID_BYTES: usize = 20;

pub struct DatabaseTokenStore {
    repo: Arc<dyn TokenRepository>,
}

impl DatabaseTokenStore {
    pub fn new(repo: Arc<dyn TokenRepository>) -> Self {
        Self { repo }
    }

    fn hash(token_id: &str) -> String {
        codec::base64url_encode(&codec::sha256(token_id.as_bytes()))
    }

    /// Remove expired rows. Run periodically by the binary.
    pub async fn delete_expired_tokens(&self) -> Result<u64> {
        let deleted = self.repo.delete_expired(Utc::now()).await?;
        if deleted > 0 {
            info!(deleted, "Purged expired tokens");
        }
        Ok(deleted)
    }
}

#[async_trait]
impl TokenStore for DatabaseTokenStore {
    async fn create(&self, _ctx: &mut RequestContext, token: &Token) -> Result<String> {
        let token_id = codec::base64url_encode(&codec::random_bytes::<TOKEN_ID_BYTES>());

        self.repo
            .insert(TokenRecord {
                token_hash: Self::hash(&token_id),
                subject: token.subject().to_string(),
                expiry: token.expiry(),
                attributes: token.attributes().clone(),
            })
            .await?;

        info!(subject = token.subject(), "Token issued");
        Ok(token_id)
    }

    async fn lookup(&self, _ctx: &RequestContext, token_id: &str) -> Result<TokenLookup> {
        let Some(record) = self.repo.find(&Self::hash(token_id)).await? else {
            debug!("Unknown token");
            return Ok(TokenLookup::Missing);
        };

        let token = Token::new(record.subject, record.expiry)?.with_attributes(record.attributes);
        Ok(TokenLookup::from_token(token))
    }

    async fn revoke(&self, _ctx: &mut RequestContext, token_id: &str) -> Result<()> {
        self.repo.delete(&Self::hash(token_id)).await?;
        info!("Token revoked");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "database"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryTokenRepository;
    use chrono::Duration;
    use hyper::{HeaderMap, Method};

    fn ctx() -> RequestContext {
        RequestContext::new(Method::POST, HeaderMap::new())
    }

    #[tokio::test]
    async fn test_raw_id_never_persisted() {
        let repo = Arc::new(InMemoryTokenRepository::new());
        let store = DatabaseTokenStore::new(repo.clone());
        let token = Token::new("alice", Utc::now() + Duration::minutes(10)).unwrap();

        let id = store.create(&mut ctx(), &token).await.unwrap();
        assert!(!repo.contains(&id));
        assert!(repo.contains(&DatabaseTokenStore::hash(&id)));
        // 20 bytes -> 27 base64url chars
        assert_eq!(id.len(), 27);
    }

    #[tokio::test]
    async fn test_delete_expired_tokens() {
        let repo = Arc::new(InMemoryTokenRepository::new());
        let store = DatabaseTokenStore::new(repo.clone());
        let expired = Token::new("alice", Utc::now() - Duration::minutes(1)).unwrap();
        let live = Token::new("alice", Utc::now() + Duration::minutes(1)).unwrap();

        let expired_id = store.create(&mut ctx(), &expired).await.unwrap();
        store.create(&mut ctx(), &live).await.unwrap();

        assert_eq!(store.lookup(&ctx(), &expired_id).await.unwrap(), TokenLookup::Expired);
        assert_eq!(store.delete_expired_tokens().await.unwrap(), 1);
        assert_eq!(store.lookup(&ctx(), &expired_id).await.unwrap(), TokenLookup::Missing);
        assert_eq!(repo.len(), 1);
    }
}
