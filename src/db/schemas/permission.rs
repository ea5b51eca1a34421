//! Permission document schema
//!
//! Maps `(resource_id, subject)` to a permission string such as `"rwd"`.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for permissions
pub const PERMISSION_COLLECTION: &str = "permissions";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PermissionDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub resource_id: String,

    pub subject: String,

    pub permissions: String,
}

impl IntoIndexes for PermissionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "resource_id": 1, "subject": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("resource_subject_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for PermissionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
