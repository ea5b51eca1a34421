//! Remotely issued access tokens verified against a JWKS endpoint
//!
//! This is the resource-server side: tokens are minted by an external
//! authorization server, so `create` and `revoke` are unsupported.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use jsonwebtoken::{decode, decode_header, errors::ErrorKind, Algorithm, Validation};
use serde::Deserialize;
use tracing::debug;

use super::signed_jwt::Audience;
use super::{KeySetCache, Token, TokenLookup, TokenStore, SCOPE_ATTRIBUTE};
use crate::context::RequestContext;
use crate::types::{GateError, Result};

/// `scope` is either a space-delimited string or a list of scope names.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScopeClaim {
    Delimited(String),
    List(Vec<String>),
}

impl ScopeClaim {
    fn normalize(self) -> String {
        match self {
            Self::Delimited(scope) => scope.split_whitespace().collect::<Vec<_>>().join(" "),
            Self::List(scopes) => scopes.join(" "),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccessClaims {
    sub: String,
    exp: i64,
    iss: String,
    aud: Audience,
    #[serde(default)]
    scope: Option<ScopeClaim>,
}

pub struct AccessTokenStore {
    issuer: String,
    audience: String,
    algorithm: Algorithm,
    keys: Arc<KeySetCache>,
}

impl AccessTokenStore {
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        algorithm: Algorithm,
        keys: Arc<KeySetCache>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            algorithm,
            keys,
        }
    }

    fn validation(&self, check_expiry: bool) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = check_expiry;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation
    }

    async fn verify(&self, token_id: &str) -> TokenLookup {
        let header = match decode_header(token_id) {
            Ok(header) => header,
            Err(e) => {
                debug!(error = %e, "Malformed access token header");
                return TokenLookup::Missing;
            }
        };
        if header.alg != self.algorithm {
            debug!(alg = ?header.alg, "Unexpected access token algorithm");
            return TokenLookup::Missing;
        }

        let candidates = self.keys.select(header.kid.as_deref(), self.algorithm).await;
        if candidates.is_empty() {
            debug!(kid = ?header.kid, "No verification key for access token");
            return TokenLookup::Missing;
        }

        let checked = self.validation(true);
        let unchecked_expiry = self.validation(false);
        for key in &candidates {
            match decode::<AccessClaims>(token_id, key, &checked) {
                Ok(data) => return self.to_lookup(data.claims),
                Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                    if decode::<AccessClaims>(token_id, key, &unchecked_expiry).is_ok() {
                        return TokenLookup::Expired;
                    }
                }
                Err(_) => continue,
            }
        }

        debug!("Access token failed verification");
        TokenLookup::Missing
    }

    fn to_lookup(&self, claims: AccessClaims) -> TokenLookup {
        if claims.iss != self.issuer || !claims.aud.contains(&self.audience) {
            return TokenLookup::Missing;
        }
        let Some(expiry) = DateTime::from_timestamp(claims.exp, 0) else {
            return TokenLookup::Missing;
        };
        let Ok(mut token) = Token::new(claims.sub, expiry) else {
            return TokenLookup::Missing;
        };
        if let Some(scope) = claims.scope {
            token = token.with_attribute(SCOPE_ATTRIBUTE, scope.normalize());
        }
        TokenLookup::from_token(token)
    }
}

#[async_trait]
impl TokenStore for AccessTokenStore {
    async fn create(&self, _ctx: &mut RequestContext, _token: &Token) -> Result<String> {
        Err(GateError::Unsupported(
            "access tokens are issued by the authorization server".into(),
        ))
    }

    async fn lookup(&self, _ctx: &RequestContext, token_id: &str) -> Result<TokenLookup> {
        Ok(self.verify(token_id).await)
    }

    async fn revoke(&self, _ctx: &mut RequestContext, _token_id: &str) -> Result<()> {
        Err(GateError::Unsupported(
            "access tokens must be revoked at the authorization server".into(),
        ))
    }

    fn supports_revocation(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "access-token"
    }
}
