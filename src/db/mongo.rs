//! MongoDB client, typed collection wrapper and repository implementations

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, DateTime, Document};
use chrono::Utc;
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::db::schemas::{
    Metadata, PermissionDoc, TokenDoc, UserDoc, PERMISSION_COLLECTION, TOKEN_COLLECTION,
    USER_COLLECTION,
};
use crate::db::{PermissionRepository, TokenRecord, TokenRepository, UserRepository};
use crate::types::{GateError, Result};

const DUPLICATE_KEY: i32 = 11000;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and verify the connection with a ping
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB");

        // Fail fast when MongoDB is unreachable
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| GateError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| GateError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection, applying its indexes
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    pub async fn new(client: &Client, db_name: &str, collection_name: &str) -> Result<Self> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    async fn apply_indexes(&self) -> Result<()> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| GateError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a document, setting metadata timestamps
    pub async fn insert_one(&self, mut item: T) -> Result<ObjectId> {
        let now = DateTime::now();
        let metadata = item.mut_metadata();
        metadata.created_at = Some(now);
        metadata.updated_at = Some(now);

        let result = self.inner.insert_one(item).await?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| GateError::Database("Failed to get inserted ID".into()))
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<T>> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| GateError::Database(format!("Find failed: {}", e)))
    }

    /// Update one document, inserting it when no document matches
    pub async fn upsert_one(&self, filter: Document, set: Document) -> Result<()> {
        let now = DateTime::now();
        let update = doc! {
            "$set": set,
            "$setOnInsert": { "metadata.created_at": now },
            "$currentDate": { "metadata.updated_at": true },
        };

        self.inner
            .update_one(filter, update)
            .upsert(true)
            .await
            .map_err(|e| GateError::Database(format!("Update failed: {}", e)))?;
        Ok(())
    }

    pub async fn delete_one(&self, filter: Document) -> Result<u64> {
        let result = self
            .inner
            .delete_one(filter)
            .await
            .map_err(|e| GateError::Database(format!("Delete failed: {}", e)))?;
        Ok(result.deleted_count)
    }

    pub async fn delete_many(&self, filter: Document) -> Result<u64> {
        let result = self
            .inner
            .delete_many(filter)
            .await
            .map_err(|e| GateError::Database(format!("Delete failed: {}", e)))?;
        Ok(result.deleted_count)
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

// =============================================================================
// Repositories
// =============================================================================

pub struct MongoTokenRepository {
    collection: MongoCollection<TokenDoc>,
}

impl MongoTokenRepository {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: client.collection(TOKEN_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl TokenRepository for MongoTokenRepository {
    async fn insert(&self, record: TokenRecord) -> Result<()> {
        self.collection.insert_one(TokenDoc::from(record)).await?;
        Ok(())
    }

    async fn find(&self, token_hash: &str) -> Result<Option<TokenRecord>> {
        let doc = self
            .collection
            .find_one(doc! { "token_hash": token_hash })
            .await?;
        Ok(doc.map(TokenRecord::from))
    }

    async fn delete(&self, token_hash: &str) -> Result<()> {
        self.collection
            .delete_one(doc! { "token_hash": token_hash })
            .await?;
        Ok(())
    }

    async fn delete_expired(&self, now: chrono::DateTime<Utc>) -> Result<u64> {
        self.collection
            .delete_many(doc! { "expires_at": { "$lte": DateTime::from_chrono(now) } })
            .await
    }
}

pub struct MongoUserRepository {
    collection: MongoCollection<UserDoc>,
}

impl MongoUserRepository {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: client.collection(USER_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl UserRepository for MongoUserRepository {
    async fn password_hash(&self, username: &str) -> Result<Option<String>> {
        let doc = self
            .collection
            .find_one(doc! { "username": username })
            .await?;
        Ok(doc.map(|u| u.password_hash))
    }

    async fn insert(&self, username: &str, password_hash: &str) -> Result<()> {
        let doc = UserDoc::new(username.to_string(), password_hash.to_string());
        match self.collection.inner.insert_one(doc).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                Err(GateError::BadRequest("Username already exists".into()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

pub struct MongoPermissionRepository {
    collection: MongoCollection<PermissionDoc>,
}

impl MongoPermissionRepository {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: client.collection(PERMISSION_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl PermissionRepository for MongoPermissionRepository {
    async fn lookup(&self, resource_id: &str, subject: &str) -> Result<Option<String>> {
        let doc = self
            .collection
            .find_one(doc! { "resource_id": resource_id, "subject": subject })
            .await?;
        Ok(doc.map(|p| p.permissions))
    }

    async fn grant(&self, resource_id: &str, subject: &str, permissions: &str) -> Result<()> {
        self.collection
            .upsert_one(
                doc! { "resource_id": resource_id, "subject": subject },
                doc! { "permissions": permissions },
            )
            .await
    }
}
