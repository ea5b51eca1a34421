//! Token document schema
//!
//! One document per issued opaque token. Only the SHA-256 hash of the raw
//! identifier is stored.

use std::collections::HashMap;
use std::time::Duration;

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::db::TokenRecord;

/// Collection name for tokens
pub const TOKEN_COLLECTION: &str = "tokens";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TokenDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// base64url(SHA-256(raw id))
    pub token_hash: String,

    pub subject: String,

    /// Also drives the TTL index
    pub expires_at: DateTime,

    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl From<TokenRecord> for TokenDoc {
    fn from(record: TokenRecord) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            token_hash: record.token_hash,
            subject: record.subject,
            expires_at: DateTime::from_chrono(record.expiry),
            attributes: record.attributes,
        }
    }
}

impl From<TokenDoc> for TokenRecord {
    fn from(doc: TokenDoc) -> Self {
        Self {
            token_hash: doc.token_hash,
            subject: doc.subject,
            expiry: doc.expires_at.to_chrono(),
            attributes: doc.attributes,
        }
    }
}

impl IntoIndexes for TokenDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "token_hash": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("token_hash_unique".to_string())
                        .build(),
                ),
            ),
            // Server-side purge backstop; the periodic task handles the rest
            (
                doc! { "expires_at": 1 },
                Some(
                    IndexOptions::builder()
                        .expire_after(Duration::from_secs(0))
                        .name("expires_at_ttl".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for TokenDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
