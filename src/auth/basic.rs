//! HTTP Basic credential extraction
//!
//! Never rejects on bad credentials: a missing subject is the signal, and
//! the require-authentication gate turns it into a 401. Only persistence
//! failures end the request here.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hyper::header::AUTHORIZATION;
use tracing::{debug, warn};

use super::password::{is_valid_username, verify_password};
use super::pipeline::Gate;
use crate::context::{Rejection, RequestContext};
use crate::db::UserRepository;

pub struct BasicAuthenticator {
    users: Arc<dyn UserRepository>,
}

impl BasicAuthenticator {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }
}

/// Decode `Basic base64(user:pass)`.
pub fn parse_basic_credentials(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

#[async_trait]
impl Gate for BasicAuthenticator {
    async fn check(&self, ctx: &mut RequestContext) -> Result<(), Rejection> {
        let Some((username, password)) = ctx
            .header(AUTHORIZATION)
            .and_then(parse_basic_credentials)
        else {
            return Ok(());
        };

        if !is_valid_username(&username) {
            debug!("Malformed username in Basic credentials");
            return Ok(());
        }

        // Persistence failures are not credential failures
        let Some(hash) = self.users.password_hash(&username).await? else {
            debug!("Unknown user");
            return Ok(());
        };

        match verify_password(&password, &hash) {
            Ok(true) => ctx.set_subject(username),
            Ok(false) => debug!("Password mismatch"),
            Err(e) => warn!(error = %e, "Stored password hash unusable"),
        }
        Ok(())
    }
}
