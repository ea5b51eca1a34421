//! Authorization gates: require-authentication, ACL permissions, OAuth2 scopes

use std::sync::Arc;

use async_trait::async_trait;
use hyper::Method;
use tracing::debug;

use super::pipeline::Gate;
use super::validator::EXPIRED_CHALLENGE;
use crate::context::{Rejection, RequestContext};
use crate::db::PermissionRepository;
use crate::token::SCOPE_ATTRIBUTE;

/// Path parameter naming the resource guarded by [`RequirePermission`].
pub const DEFAULT_RESOURCE_PARAM: &str = "space_id";

/// Reject unauthenticated requests with a 401 and a Bearer challenge.
pub fn require_authentication(ctx: &RequestContext) -> Result<(), Rejection> {
    if ctx.is_authenticated() {
        return Ok(());
    }

    let challenge = if ctx.token_expired() {
        EXPIRED_CHALLENGE
    } else {
        "Bearer"
    };
    Err(Rejection::unauthorized(challenge))
}

fn method_matches(required: &Method, actual: &Method) -> bool {
    required.as_str().eq_ignore_ascii_case(actual.as_str())
}

pub struct RequireAuthentication;

#[async_trait]
impl Gate for RequireAuthentication {
    async fn check(&self, ctx: &mut RequestContext) -> Result<(), Rejection> {
        require_authentication(ctx)
    }
}

/// ACL gate: the subject must hold `permission` on the resource named by
/// the path parameter. Only applies to requests with the given method.
pub struct RequirePermission {
    method: Method,
    permission: String,
    permissions: Arc<dyn PermissionRepository>,
    resource_param: String,
}

impl RequirePermission {
    pub fn new(
        method: Method,
        permission: impl Into<String>,
        permissions: Arc<dyn PermissionRepository>,
    ) -> Self {
        Self {
            method,
            permission: permission.into(),
            permissions,
            resource_param: DEFAULT_RESOURCE_PARAM.to_string(),
        }
    }

    pub fn with_resource_param(mut self, name: impl Into<String>) -> Self {
        self.resource_param = name.into();
        self
    }
}

#[async_trait]
impl Gate for RequirePermission {
    async fn check(&self, ctx: &mut RequestContext) -> Result<(), Rejection> {
        if !method_matches(&self.method, ctx.method()) {
            return Ok(());
        }
        require_authentication(ctx)?;

        let Some(resource_id) = ctx.path_param(&self.resource_param) else {
            return Err(Rejection::bad_request(format!(
                "missing path parameter '{}'",
                self.resource_param
            )));
        };
        let subject = ctx.subject().unwrap_or_default();

        let granted = self
            .permissions
            .lookup(resource_id, subject)
            .await?
            .unwrap_or_default();

        if granted.contains(self.permission.as_str()) {
            Ok(())
        } else {
            debug!(
                resource_id,
                subject,
                required = %self.permission,
                "Permission denied"
            );
            Err(Rejection::forbidden())
        }
    }
}

/// OAuth2 scope gate. Tokens without a scope attribute are not restricted.
pub struct RequireScope {
    method: Method,
    scope: String,
}

impl RequireScope {
    pub fn new(method: Method, scope: impl Into<String>) -> Self {
        Self {
            method,
            scope: scope.into(),
        }
    }

    fn challenge(&self) -> String {
        format!(r#"Bearer error="insufficient_scope", scope="{}""#, self.scope)
    }
}

#[async_trait]
impl Gate for RequireScope {
    async fn check(&self, ctx: &mut RequestContext) -> Result<(), Rejection> {
        if !method_matches(&self.method, ctx.method()) {
            return Ok(());
        }
        let Some(scope) = ctx.attribute(SCOPE_ATTRIBUTE) else {
            return Ok(());
        };

        if scope.split_whitespace().any(|s| s == self.scope) {
            Ok(())
        } else {
            debug!(required = %self.scope, "Scope denied");
            Err(Rejection::forbidden().with_challenge(&self.challenge()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryPermissionRepository;
    use hyper::{HeaderMap, StatusCode};

    fn ctx(method: Method, subject: Option<&str>) -> RequestContext {
        let mut ctx = RequestContext::new(method, HeaderMap::new()).with_path_param("space_id", "42");
        if let Some(subject) = subject {
            ctx.set_subject(subject);
        }
        ctx
    }

    #[test]
    fn test_require_authentication_challenges() {
        let mut anonymous = ctx(Method::GET, None);
        let rejection = require_authentication(&anonymous).unwrap_err();
        assert_eq!(rejection.status, StatusCode::UNAUTHORIZED);
        assert_eq!(rejection.challenge(), Some("Bearer"));

        anonymous.mark_token_expired();
        let rejection = require_authentication(&anonymous).unwrap_err();
        assert_eq!(rejection.challenge(), Some(EXPIRED_CHALLENGE));

        assert!(require_authentication(&ctx(Method::GET, Some("alice"))).is_ok());
    }

    #[tokio::test]
    async fn test_permission_requires_authentication() {
        let gate = RequirePermission::new(
            Method::GET,
            "r",
            Arc::new(InMemoryPermissionRepository::new()),
        );
        let rejection = gate.check(&mut ctx(Method::GET, None)).await.unwrap_err();
        assert_eq!(rejection.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_permission_ignores_other_methods() {
        let gate = RequirePermission::new(
            Method::DELETE,
            "d",
            Arc::new(InMemoryPermissionRepository::new()),
        );
        assert!(gate.check(&mut ctx(Method::GET, None)).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_resource_param() {
        let repo = Arc::new(InMemoryPermissionRepository::new());
        let gate = RequirePermission::new(Method::GET, "r", repo).with_resource_param("room");
        let rejection = gate
            .check(&mut ctx(Method::GET, Some("alice")))
            .await
            .unwrap_err();
        assert_eq!(rejection.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_scope_unrestricted_without_attribute() {
        let gate = RequireScope::new(Method::GET, "list_messages");
        assert!(gate.check(&mut ctx(Method::GET, Some("alice"))).await.is_ok());
    }

    #[tokio::test]
    async fn test_scope_denied_challenge() {
        let gate = RequireScope::new(Method::POST, "post_message");
        let mut request = ctx(Method::POST, Some("alice"));
        request.set_attribute("scope", "read_message list_messages");

        let rejection = gate.check(&mut request).await.unwrap_err();
        assert_eq!(rejection.status, StatusCode::FORBIDDEN);
        assert_eq!(
            rejection.challenge(),
            Some(r#"Bearer error="insufficient_scope", scope="post_message""#)
        );
    }

    #[tokio::test]
    async fn test_scope_is_token_not_substring() {
        let gate = RequireScope::new(Method::GET, "read");
        let mut request = ctx(Method::GET, Some("alice"));
        request.set_attribute("scope", "read_message");
        assert!(gate.check(&mut request).await.is_err());
    }
}
