//! Persistence collaborators
//!
//! The core only depends on the repository traits below. Two backends are
//! provided: in-memory (dev mode and tests) and MongoDB.

pub mod memory;
pub mod mongo;
pub mod schemas;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::Result;

pub use memory::{InMemoryPermissionRepository, InMemoryTokenRepository, InMemoryUserRepository};
pub use mongo::{
    MongoClient, MongoCollection, MongoPermissionRepository, MongoTokenRepository,
    MongoUserRepository,
};

/// Persisted token state, keyed by the hash of the raw identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub token_hash: String,
    pub subject: String,
    pub expiry: DateTime<Utc>,
    pub attributes: HashMap<String, String>,
}

/// Storage for opaque token state. Every operation touches a single row.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn insert(&self, record: TokenRecord) -> Result<()>;

    async fn find(&self, token_hash: &str) -> Result<Option<TokenRecord>>;

    /// Delete a row. Deleting an absent row is not an error.
    async fn delete(&self, token_hash: &str) -> Result<()>;

    /// Delete every row whose expiry is at or before `now`, returning the count.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Username to password-hash lookup.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn password_hash(&self, username: &str) -> Result<Option<String>>;

    /// Insert a user. Fails with `BadRequest` if the username is taken.
    async fn insert(&self, username: &str, password_hash: &str) -> Result<()>;
}

/// `(resource_id, subject) -> permission string` lookup.
#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn lookup(&self, resource_id: &str, subject: &str) -> Result<Option<String>>;

    /// Set (replace) the permissions a subject holds on a resource.
    async fn grant(&self, resource_id: &str, subject: &str, permissions: &str) -> Result<()>;
}
