//! MongoDB document schemas for tokens, users and permissions.

mod metadata;
mod permission;
mod token;
mod user;

pub use metadata::Metadata;
pub use permission::{PermissionDoc, PERMISSION_COLLECTION};
pub use token::{TokenDoc, TOKEN_COLLECTION};
pub use user::{UserDoc, USER_COLLECTION};
