//! Token issuance and revocation (login/logout)

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use super::gates::require_authentication;
use super::validator::TokenTransport;
use crate::context::{Rejection, RequestContext};
use crate::token::{Token, TokenStore, SCOPE_ATTRIBUTE};
use crate::types::GateError;

/// Body returned by a successful login.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenController {
    store: Arc<dyn TokenStore>,
    transport: TokenTransport,
    ttl: Duration,
    default_scope: String,
}

impl TokenController {
    pub fn new(
        store: Arc<dyn TokenStore>,
        transport: TokenTransport,
        ttl: Duration,
        default_scope: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            ttl,
            default_scope: default_scope.into(),
        }
    }

    /// Issue a token for the authenticated subject.
    ///
    /// The `scope` query parameter narrows the granted scope; without it the
    /// default scope set is granted.
    pub async fn login(&self, ctx: &mut RequestContext) -> Result<IssuedToken, Rejection> {
        require_authentication(ctx)?;
        let subject = ctx.subject().unwrap_or_default().to_string();

        let scope = ctx
            .query_param(SCOPE_ATTRIBUTE)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.default_scope.as_str())
            .to_string();

        let expiry = Utc::now()
            .checked_add_signed(self.ttl)
            .ok_or_else(|| GateError::Config("token TTL out of range".into()))?;
        let token = Token::new(subject, expiry)?.with_attribute(SCOPE_ATTRIBUTE, scope);
        let token_id = self.store.create(ctx, &token).await?;

        if self.transport == TokenTransport::Cookie {
            ctx.set_token_cookie(&token_id);
        }

        info!(subject = token.subject(), store = self.store.name(), "Login");
        Ok(IssuedToken {
            token: token_id,
            expires_at: token.expiry(),
        })
    }

    /// Revoke the presented token.
    pub async fn logout(&self, ctx: &mut RequestContext) -> Result<(), Rejection> {
        let Some(token_id) = self.transport.extract(ctx) else {
            return Err(GateError::BadRequest("missing token".into()).into());
        };

        self.store.revoke(ctx, &token_id).await?;

        if self.transport == TokenTransport::Cookie {
            ctx.clear_token_cookie();
        }
        info!(store = self.store.name(), "Logout");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryTokenRepository;
    use crate::token::{DatabaseTokenStore, SignedJwtTokenStore};
    use hyper::header::{HeaderValue, AUTHORIZATION, SET_COOKIE};
    use hyper::{HeaderMap, Method, StatusCode};

    const DEFAULT_SCOPE: &str = "create_space post_message read_message";

    fn controller(transport: TokenTransport) -> TokenController {
        let store = Arc::new(DatabaseTokenStore::new(Arc::new(InMemoryTokenRepository::new())));
        TokenController::new(store, transport, Duration::minutes(10), DEFAULT_SCOPE)
    }

    fn authenticated(query: Option<&str>) -> RequestContext {
        let mut ctx = RequestContext::new(Method::POST, HeaderMap::new()).with_query(query);
        ctx.set_subject("alice");
        ctx
    }

    fn presenting(token_id: &str) -> RequestContext {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token_id}")).unwrap(),
        );
        RequestContext::new(Method::DELETE, headers)
    }

    #[tokio::test]
    async fn test_login_requires_subject() {
        let controller = controller(TokenTransport::Bearer);
        let mut ctx = RequestContext::new(Method::POST, HeaderMap::new());
        let rejection = controller.login(&mut ctx).await.unwrap_err();
        assert_eq!(rejection.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_grants_default_or_requested_scope() {
        let controller = controller(TokenTransport::Bearer);

        let issued = controller.login(&mut authenticated(None)).await.unwrap();
        let token = controller
            .store
            .read(&presenting(&issued.token), &issued.token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.scope(), Some(DEFAULT_SCOPE));
        assert!(issued.expires_at > Utc::now() + Duration::minutes(9));

        let issued = controller
            .login(&mut authenticated(Some("scope=read_message")))
            .await
            .unwrap();
        let token = controller
            .store
            .read(&presenting(&issued.token), &issued.token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.scope(), Some("read_message"));
    }

    #[tokio::test]
    async fn test_unrepresentable_expiry_is_config_error() {
        let store = Arc::new(DatabaseTokenStore::new(Arc::new(InMemoryTokenRepository::new())));
        let controller = TokenController::new(
            store,
            TokenTransport::Bearer,
            Duration::days(365 * 1_000_000),
            DEFAULT_SCOPE,
        );
        let rejection = controller.login(&mut authenticated(None)).await.unwrap_err();
        assert_eq!(rejection.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_logout_revokes() {
        let controller = controller(TokenTransport::Bearer);
        let issued = controller.login(&mut authenticated(None)).await.unwrap();

        let mut ctx = presenting(&issued.token);
        controller.logout(&mut ctx).await.unwrap();
        assert_eq!(controller.store.read(&ctx, &issued.token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_logout_without_token_is_bad_request() {
        let controller = controller(TokenTransport::Bearer);
        let mut ctx = RequestContext::new(Method::DELETE, HeaderMap::new());
        let rejection = controller.logout(&mut ctx).await.unwrap_err();
        assert_eq!(rejection.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_logout_on_stateless_store_is_not_implemented() {
        let store = Arc::new(SignedJwtTokenStore::hmac(&[1u8; 32], "https://api.example"));
        let controller = TokenController::new(
            store,
            TokenTransport::Bearer,
            Duration::minutes(10),
            DEFAULT_SCOPE,
        );
        let issued = controller.login(&mut authenticated(None)).await.unwrap();
        let rejection = controller
            .logout(&mut presenting(&issued.token))
            .await
            .unwrap_err();
        assert_eq!(rejection.status, StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_cookie_transport_sets_cookie() {
        let controller = controller(TokenTransport::Cookie);
        let mut ctx = authenticated(None);
        let issued = controller.login(&mut ctx).await.unwrap();
        let cookie = ctx.response_headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with(&format!("natter_token={}", issued.token)));
    }
}
