//! Token store stack construction from configuration
//!
//! | kind            | stack                                      |
//! |-----------------|--------------------------------------------|
//! | `session`       | session                                    |
//! | `database`      | database                                   |
//! | `hmac`          | hmac(database)                             |
//! | `encrypted`     | hmac(encrypted(database))                  |
//! | `jwt`           | signed JWT (HS256)                         |
//! | `encrypted-jwt` | encrypted JWT                              |
//! | `access-token`  | remote JWKS-verified access token          |

use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use tracing::info;

use super::{
    AccessTokenStore, DatabaseTokenStore, EncryptedJwtTokenStore, EncryptedTokenStore,
    HmacTokenStore, HttpKeySetSource, KeySetCache, KeySetSource, SessionStore,
    SessionTokenStore, SignedJwtTokenStore, TokenStore,
};
use crate::config::{Args, KeyMaterial};
use crate::db::TokenRepository;
use crate::types::{GateError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TokenStoreKind {
    Session,
    Database,
    Hmac,
    Encrypted,
    Jwt,
    EncryptedJwt,
    AccessToken,
}

impl TokenStoreKind {
    pub fn needs_mac_key(self) -> bool {
        matches!(self, Self::Hmac | Self::Encrypted)
    }

    pub fn needs_encryption_key(self) -> bool {
        matches!(self, Self::Encrypted | Self::EncryptedJwt)
    }

    pub fn needs_jwt_secret(self) -> bool {
        matches!(self, Self::Jwt)
    }

    /// Whether the stack persists tokens in the token repository.
    pub fn uses_token_repository(self) -> bool {
        matches!(self, Self::Database | Self::Hmac | Self::Encrypted)
    }
}

/// Collaborators a store stack may need.
pub struct StoreDependencies {
    pub token_repo: Arc<dyn TokenRepository>,
    pub sessions: Arc<SessionStore>,
    /// Overrides the HTTP key-set source (tests, in-process issuers).
    pub key_source: Option<Arc<dyn KeySetSource>>,
}

fn missing(key: &str) -> GateError {
    GateError::Config(format!("{key} is required for this token store"))
}

/// Build the configured store stack.
pub fn build_token_store(
    args: &Args,
    keys: &KeyMaterial,
    deps: StoreDependencies,
) -> Result<Arc<dyn TokenStore>> {
    let database = || Box::new(DatabaseTokenStore::new(deps.token_repo.clone()));

    let store: Arc<dyn TokenStore> = match args.token_store {
        TokenStoreKind::Session => Arc::new(SessionTokenStore::new(deps.sessions.clone())),
        TokenStoreKind::Database => Arc::new(DatabaseTokenStore::new(deps.token_repo.clone())),
        TokenStoreKind::Hmac => {
            let mac = keys.mac_key.clone().ok_or_else(|| missing("HMAC_KEY"))?;
            Arc::new(HmacTokenStore::new(database(), mac))
        }
        TokenStoreKind::Encrypted => {
            let mac = keys.mac_key.clone().ok_or_else(|| missing("HMAC_KEY"))?;
            let enc = keys
                .encryption_key
                .clone()
                .ok_or_else(|| missing("ENCRYPTION_KEY"))?;
            let sealed = EncryptedTokenStore::new(database(), enc);
            Arc::new(HmacTokenStore::new(Box::new(sealed), mac))
        }
        TokenStoreKind::Jwt => {
            let secret = keys.jwt_secret.as_ref().ok_or_else(|| missing("JWT_SECRET"))?;
            Arc::new(SignedJwtTokenStore::hmac(secret, args.audience.clone()))
        }
        TokenStoreKind::EncryptedJwt => {
            let enc = keys
                .encryption_key
                .clone()
                .ok_or_else(|| missing("ENCRYPTION_KEY"))?;
            Arc::new(EncryptedJwtTokenStore::new(enc, args.audience.clone()))
        }
        TokenStoreKind::AccessToken => {
            let issuer = args.issuer.clone().ok_or_else(|| missing("ISSUER"))?;
            let algorithm = args.access_token_algorithm().map_err(GateError::Config)?;
            let source = match deps.key_source {
                Some(source) => source,
                None => {
                    let url = args.jwks_url.clone().ok_or_else(|| missing("JWKS_URL"))?;
                    Arc::new(HttpKeySetSource::new(
                        url,
                        Duration::from_millis(args.jwks_timeout_ms),
                    )?)
                }
            };
            let cache = Arc::new(KeySetCache::new(source, args.key_set_cache_config()));
            Arc::new(AccessTokenStore::new(
                issuer,
                args.audience.clone(),
                algorithm,
                cache,
            ))
        }
    };

    info!(
        store = store.name(),
        revocable = store.supports_revocation(),
        "Token store ready"
    );
    Ok(store)
}
