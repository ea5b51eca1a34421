//! Token validation gate and token transports

use std::sync::Arc;

use async_trait::async_trait;
use clap::ValueEnum;
use hyper::header::{HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use tracing::debug;

use super::pipeline::Gate;
use crate::context::{Rejection, RequestContext, TOKEN_COOKIE};
use crate::token::{TokenLookup, TokenStore};

/// Challenge sent when a presented token was valid but has expired.
pub const EXPIRED_CHALLENGE: &str = r#"Bearer error="invalid_token", error_description="Expired""#;

/// Header carrying the session-derived token in `csrf` mode.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Where a request carries its token identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TokenTransport {
    /// `Authorization: Bearer <id>`
    Bearer,
    /// `natter_token` cookie
    Cookie,
    /// `X-CSRF-Token` header, paired with the session cookie
    Csrf,
}

impl TokenTransport {
    pub fn extract(self, ctx: &RequestContext) -> Option<String> {
        match self {
            Self::Bearer => ctx.header(AUTHORIZATION).and_then(extract_bearer),
            Self::Cookie => ctx.cookie(TOKEN_COOKIE),
            Self::Csrf => ctx
                .header(CSRF_HEADER)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        }
    }
}

/// Extract the token from an `Authorization: Bearer` value.
pub fn extract_bearer(header: &str) -> Option<String> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

/// Resolves a presented token into the request's subject and attributes.
pub struct TokenValidator {
    store: Arc<dyn TokenStore>,
    transport: TokenTransport,
}

impl TokenValidator {
    pub fn new(store: Arc<dyn TokenStore>, transport: TokenTransport) -> Self {
        Self { store, transport }
    }
}

#[async_trait]
impl Gate for TokenValidator {
    async fn check(&self, ctx: &mut RequestContext) -> Result<(), Rejection> {
        let Some(token_id) = self.transport.extract(ctx) else {
            return Ok(());
        };

        match self.store.lookup(ctx, &token_id).await? {
            TokenLookup::Found(token) => {
                ctx.set_subject(token.subject());
                for (key, value) in token.attributes() {
                    ctx.set_attribute(key.clone(), value.clone());
                }
            }
            TokenLookup::Expired => {
                debug!("Presented token has expired");
                ctx.mark_token_expired();
                ctx.set_response_header(
                    WWW_AUTHENTICATE,
                    HeaderValue::from_static(EXPIRED_CHALLENGE),
                );
            }
            TokenLookup::Missing => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryTokenRepository;
    use crate::token::{DatabaseTokenStore, Token};
    use chrono::{Duration, Utc};
    use hyper::header::COOKIE;
    use hyper::{HeaderMap, Method};

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc.def"), Some("abc.def".into()));
        assert_eq!(extract_bearer("bearer abc"), Some("abc".into()));
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("Basic abc"), None);
        assert_eq!(extract_bearer("Bearerabc"), None);
    }

    #[test]
    fn test_transports() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        headers.insert(COOKIE, HeaderValue::from_static("natter_token=from-cookie"));
        headers.insert(CSRF_HEADER, HeaderValue::from_static("from-csrf"));
        let ctx = RequestContext::new(Method::GET, headers);

        assert_eq!(TokenTransport::Bearer.extract(&ctx).as_deref(), Some("from-header"));
        assert_eq!(TokenTransport::Cookie.extract(&ctx).as_deref(), Some("from-cookie"));
        assert_eq!(TokenTransport::Csrf.extract(&ctx).as_deref(), Some("from-csrf"));
    }

    fn bearer_ctx(token_id: &str) -> RequestContext {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token_id}")).unwrap(),
        );
        RequestContext::new(Method::GET, headers)
    }

    #[tokio::test]
    async fn test_valid_token_populates_context() {
        let store = Arc::new(DatabaseTokenStore::new(Arc::new(InMemoryTokenRepository::new())));
        let token = Token::new("alice", Utc::now() + Duration::minutes(10))
            .unwrap()
            .with_attribute("scope", "read_message");
        let mut issuing = RequestContext::new(Method::POST, HeaderMap::new());
        let id = store.create(&mut issuing, &token).await.unwrap();

        let validator = TokenValidator::new(store, TokenTransport::Bearer);
        let mut ctx = bearer_ctx(&id);
        validator.check(&mut ctx).await.unwrap();

        assert_eq!(ctx.subject(), Some("alice"));
        assert_eq!(ctx.attribute("scope"), Some("read_message"));
    }

    #[tokio::test]
    async fn test_expired_token_sets_hint_only() {
        let store = Arc::new(DatabaseTokenStore::new(Arc::new(InMemoryTokenRepository::new())));
        let token = Token::new("alice", Utc::now() - Duration::minutes(1)).unwrap();
        let mut issuing = RequestContext::new(Method::POST, HeaderMap::new());
        let id = store.create(&mut issuing, &token).await.unwrap();

        let validator = TokenValidator::new(store, TokenTransport::Bearer);
        let mut ctx = bearer_ctx(&id);
        validator.check(&mut ctx).await.unwrap();

        assert!(!ctx.is_authenticated());
        assert!(ctx.token_expired());
        assert_eq!(
            ctx.response_headers().get(WWW_AUTHENTICATE).unwrap(),
            EXPIRED_CHALLENGE
        );
    }

    #[tokio::test]
    async fn test_unknown_token_is_not_an_error() {
        let store = Arc::new(DatabaseTokenStore::new(Arc::new(InMemoryTokenRepository::new())));
        let validator = TokenValidator::new(store, TokenTransport::Bearer);
        let mut ctx = bearer_ctx("made-up");
        validator.check(&mut ctx).await.unwrap();
        assert!(!ctx.is_authenticated());
        assert!(!ctx.token_expired());
    }
}
