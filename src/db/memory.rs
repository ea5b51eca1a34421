//! In-memory repositories backed by DashMap

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{PermissionRepository, TokenRecord, TokenRepository, UserRepository};
use crate::types::{GateError, Result};

/// Token rows keyed by token hash
#[derive(Debug, Default)]
pub struct InMemoryTokenRepository {
    rows: DashMap<String, TokenRecord>,
}

impl InMemoryTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether a row exists for this hash.
    pub fn contains(&self, token_hash: &str) -> bool {
        self.rows.contains_key(token_hash)
    }
}

#[async_trait]
impl TokenRepository for InMemoryTokenRepository {
    async fn insert(&self, record: TokenRecord) -> Result<()> {
        self.rows.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn find(&self, token_hash: &str) -> Result<Option<TokenRecord>> {
        Ok(self.rows.get(token_hash).map(|r| r.value().clone()))
    }

    async fn delete(&self, token_hash: &str) -> Result<()> {
        self.rows.remove(token_hash);
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let before = self.rows.len();
        self.rows.retain(|_, record| record.expiry > now);
        Ok(before.saturating_sub(self.rows.len()) as u64)
    }
}

/// Users keyed by username
#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    users: DashMap<String, String>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn password_hash(&self, username: &str) -> Result<Option<String>> {
        Ok(self.users.get(username).map(|h| h.value().clone()))
    }

    async fn insert(&self, username: &str, password_hash: &str) -> Result<()> {
        match self.users.entry(username.to_string()) {
            Entry::Occupied(_) => Err(GateError::BadRequest("Username already exists".into())),
            Entry::Vacant(slot) => {
                slot.insert(password_hash.to_string());
                Ok(())
            }
        }
    }
}

/// Permissions keyed by `(resource_id, subject)`
#[derive(Debug, Default)]
pub struct InMemoryPermissionRepository {
    grants: DashMap<(String, String), String>,
}

impl InMemoryPermissionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionRepository for InMemoryPermissionRepository {
    async fn lookup(&self, resource_id: &str, subject: &str) -> Result<Option<String>> {
        Ok(self
            .grants
            .get(&(resource_id.to_string(), subject.to_string()))
            .map(|p| p.value().clone()))
    }

    async fn grant(&self, resource_id: &str, subject: &str, permissions: &str) -> Result<()> {
        self.grants.insert(
            (resource_id.to_string(), subject.to_string()),
            permissions.to_string(),
        );
        Ok(())
    }
}
