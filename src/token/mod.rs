//! Token model and the `TokenStore` capability.
//!
//! Stores either originate identifiers (session, database, self-contained
//! JWT variants) or wrap another store (HMAC integrity, authenticated
//! encryption). Wrappers own their inner store and are stacked at startup:
//!
//! ```text
//! client ── HmacTokenStore ── EncryptedTokenStore ── DatabaseTokenStore ── repository
//!            strip/verify tag    open box               hash(id) lookup
//! ```
//!
//! Issuing runs innermost first; reading and revoking unwrap outermost first.

pub mod access_token;
pub mod builder;
pub mod database;
pub mod encrypted;
pub mod encrypted_jwt;
pub mod hmac;
pub mod jwks;
pub mod keys;
pub mod session;
pub mod signed_jwt;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};

use crate::context::RequestContext;
use crate::types::{GateError, Result};

pub use access_token::AccessTokenStore;
pub use builder::{build_token_store, StoreDependencies, TokenStoreKind};
pub use database::DatabaseTokenStore;
pub use encrypted::EncryptedTokenStore;
pub use encrypted_jwt::EncryptedJwtTokenStore;
pub use hmac::HmacTokenStore;
pub use jwks::{HttpKeySetSource, KeySetCache, KeySetCacheConfig, KeySetSource};
pub use keys::{EncryptionKey, MacKey};
pub use session::{SessionStore, SessionTokenStore};
pub use signed_jwt::SignedJwtTokenStore;

/// Attribute carrying the space-delimited OAuth2 scope set.
pub const SCOPE_ATTRIBUTE: &str = "scope";

/// An authenticated session: who, until when, and auxiliary claims.
///
/// Expiry is kept at whole-second precision so that every store variant,
/// including the self-contained ones, round-trips it exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    subject: String,
    expiry: DateTime<Utc>,
    attributes: HashMap<String, String>,
}

impl Token {
    /// Create a token for `subject` expiring at `expiry`.
    ///
    /// Returns an error if the subject is empty.
    pub fn new(subject: impl Into<String>, expiry: DateTime<Utc>) -> Result<Self> {
        let subject = subject.into();
        if subject.is_empty() {
            return Err(GateError::BadRequest("token subject must not be empty".into()));
        }

        Ok(Self {
            subject,
            expiry: expiry.trunc_subsecs(0),
            attributes: HashMap::new(),
        })
    }

    /// Add an attribute while building the token.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add several attributes while building the token.
    pub fn with_attributes<I, K, V>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes
            .extend(attributes.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// The token's scope set, if it carries one.
    pub fn scope(&self) -> Option<&str> {
        self.attribute(SCOPE_ATTRIBUTE)
    }

    /// A token is invalid at or after its expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Outcome of looking a token identifier up.
///
/// `Expired` is only reported for identifiers that were otherwise fully
/// valid (tag, signature and audience checks passed), so it reveals nothing
/// to someone guessing identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLookup {
    Found(Token),
    Expired,
    Missing,
}

impl TokenLookup {
    /// Classify a validated token against the current time.
    pub fn from_token(token: Token) -> Self {
        if token.is_expired() {
            Self::Expired
        } else {
            Self::Found(token)
        }
    }

    pub fn into_token(self) -> Option<Token> {
        match self {
            Self::Found(token) => Some(token),
            Self::Expired | Self::Missing => None,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

/// Issue, read and revoke bearer token identifiers.
///
/// `lookup`/`read` return "nothing" (never an error) for malformed,
/// tampered, unknown or expired identifiers. Errors are reserved for
/// infrastructure failures, which must not be mistaken for a bad token.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Store the token and return the identifier the client must present.
    async fn create(&self, ctx: &mut RequestContext, token: &Token) -> Result<String>;

    /// Resolve an identifier, distinguishing expired tokens from absent ones.
    async fn lookup(&self, ctx: &RequestContext, token_id: &str) -> Result<TokenLookup>;

    /// Resolve an identifier to a currently valid token.
    async fn read(&self, ctx: &RequestContext, token_id: &str) -> Result<Option<Token>> {
        Ok(self.lookup(ctx, token_id).await?.into_token())
    }

    /// Revoke an identifier. Unknown or already revoked identifiers are a no-op.
    ///
    /// Stateless variants return [`GateError::Unsupported`].
    async fn revoke(&self, ctx: &mut RequestContext, token_id: &str) -> Result<()>;

    /// Whether `revoke` actually invalidates identifiers.
    fn supports_revocation(&self) -> bool {
        true
    }

    /// Short name for logging.
    fn name(&self) -> &'static str;
}
