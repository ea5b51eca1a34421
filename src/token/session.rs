//! Session-backed token store
//!
//! Token state lives in a server-side session keyed by a random session id
//! carried in the `natter_session` cookie. The identifier handed to the
//! client is `base64url(SHA-256(session_id))`, which the client echoes in a
//! header; a cross-site request carries the cookie but cannot know the hash.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info};

use super::{Token, TokenLookup, TokenStore};
use crate::codec;
use crate::context::RequestContext;
use crate::types::Result;

/// Session id entropy (160 bits)
const SESSION_ID_BYTES: usize = 20;

/// Server-side session table.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Token>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session holding `token`, returning its id.
    pub fn start(&self, token: Token) -> String {
        let session_id = codec::base64url_encode(&codec::random_bytes::<SESSION_ID_BYTES>());
        self.sessions.insert(session_id.clone(), token);
        session_id
    }

    pub fn get(&self, session_id: &str) -> Option<Token> {
        self.sessions.get(session_id).map(|t| t.value().clone())
    }

    pub fn invalidate(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Drop every expired session, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, token| !token.is_expired_at(now));
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Binds tokens to the request's server-side session.
pub struct SessionTokenStore {
    sessions: Arc<SessionStore>,
}

impl SessionTokenStore {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }

    fn csrf_token(session_id: &str) -> String {
        codec::base64url_encode(&codec::sha256(session_id.as_bytes()))
    }

    /// Resolve the session id only if `token_id` is its hash.
    fn bound_session<'a>(ctx: &'a RequestContext, token_id: &str) -> Option<&'a str> {
        let session_id = ctx.session_id()?;
        let expected = Self::csrf_token(session_id);
        codec::constant_time_eq(expected.as_bytes(), token_id.as_bytes()).then_some(session_id)
    }
}

#[async_trait]
impl TokenStore for SessionTokenStore {
    async fn create(&self, ctx: &mut RequestContext, token: &Token) -> Result<String> {
        // A fresh session for every login: never reuse an id the client supplied
        if let Some(existing) = ctx.session_id() {
            self.sessions.invalidate(existing);
        }
        ctx.end_session();

        let session_id = self.sessions.start(token.clone());
        let token_id = Self::csrf_token(&session_id);
        ctx.start_session(session_id);

        info!(subject = token.subject(), "Session started");
        Ok(token_id)
    }

    async fn lookup(&self, ctx: &RequestContext, token_id: &str) -> Result<TokenLookup> {
        let Some(session_id) = Self::bound_session(ctx, token_id) else {
            debug!("Session token does not match session cookie");
            return Ok(TokenLookup::Missing);
        };

        Ok(match self.sessions.get(session_id) {
            Some(token) => TokenLookup::from_token(token),
            None => TokenLookup::Missing,
        })
    }

    async fn revoke(&self, ctx: &mut RequestContext, token_id: &str) -> Result<()> {
        if let Some(session_id) = Self::bound_session(ctx, token_id) {
            self.sessions.invalidate(session_id);
            ctx.end_session();
            info!("Session invalidated");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "session"
    }
}
