//! Authenticated-encryption wrapper
//!
//! Seals the inner identifier in an XChaCha20-Poly1305 box:
//! `base64url(nonce || ciphertext || tag)`. The client cannot read or alter
//! the inner identifier.

use async_trait::async_trait;
use tracing::debug;

use super::{EncryptionKey, Token, TokenLookup, TokenStore};
use crate::codec;
use crate::context::RequestContext;
use crate::types::Result;

pub struct EncryptedTokenStore {
    inner: Box<dyn TokenStore>,
    key: EncryptionKey,
}

impl EncryptedTokenStore {
    pub fn new(inner: Box<dyn TokenStore>, key: EncryptionKey) -> Self {
        Self { inner, key }
    }

    fn open(&self, token_id: &str) -> Option<String> {
        let plaintext = codec::open_box(self.key.as_bytes(), token_id)?;
        String::from_utf8(plaintext).ok()
    }
}

#[async_trait]
impl TokenStore for EncryptedTokenStore {
    async fn create(&self, ctx: &mut RequestContext, token: &Token) -> Result<String> {
        let inner_id = self.inner.create(ctx, token).await?;
        codec::seal_box(self.key.as_bytes(), inner_id.as_bytes())
    }

    async fn lookup(&self, ctx: &RequestContext, token_id: &str) -> Result<TokenLookup> {
        match self.open(token_id) {
            Some(inner_id) => self.inner.lookup(ctx, &inner_id).await,
            None => {
                debug!("Token box failed to open");
                Ok(TokenLookup::Missing)
            }
        }
    }

    async fn revoke(&self, ctx: &mut RequestContext, token_id: &str) -> Result<()> {
        match self.open(token_id) {
            Some(inner_id) => self.inner.revoke(ctx, &inner_id).await,
            None => Ok(()),
        }
    }

    fn supports_revocation(&self) -> bool {
        self.inner.supports_revocation()
    }

    fn name(&self) -> &'static str {
        "encrypted"
    }
}
