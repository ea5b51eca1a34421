//! Configuration for natter-gate
//!
//! CLI arguments and environment variable handling using clap.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use jsonwebtoken::Algorithm;
use tracing::warn;
use zeroize::Zeroizing;

use crate::auth::TokenTransport;
use crate::codec;
use crate::token::keys::MIN_KEY_LEN;
use crate::token::{EncryptionKey, KeySetCacheConfig, MacKey, TokenStoreKind};
use crate::types::{GateError, Result};

/// Longest accepted token lifetime (one year)
pub const MAX_TOKEN_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

/// natter-gate - token issuance and authorization gates for the Natter API
#[derive(Parser, Debug, Clone)]
#[command(name = "natter-gate")]
#[command(about = "Token stores and authorization gates for the Natter API")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "127.0.0.1:4567")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory persistence fallback, generated keys)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "natter")]
    pub mongodb_db: String,

    /// Token store stack to serve
    #[arg(long, env = "TOKEN_STORE", value_enum, default_value = "hmac")]
    pub token_store: TokenStoreKind,

    /// Where clients present token identifiers
    #[arg(long, env = "TOKEN_TRANSPORT", value_enum, default_value = "bearer")]
    pub token_transport: TokenTransport,

    /// Lifetime of issued tokens in seconds
    #[arg(long, env = "TOKEN_TTL_SECONDS", default_value = "600")]
    pub token_ttl_seconds: u64,

    /// Scope granted when a login request names none
    #[arg(
        long,
        env = "DEFAULT_SCOPE",
        default_value = "create_space post_message read_message list_messages delete_message add_member"
    )]
    pub default_scope: String,

    /// HMAC key for token integrity (base64url, at least 32 bytes)
    #[arg(long, env = "HMAC_KEY", hide_env_values = true)]
    pub hmac_key: Option<String>,

    /// Encryption key for sealed tokens (base64url, 32 bytes)
    #[arg(long, env = "ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,

    /// HS256 secret for signed tokens (base64url, at least 32 bytes)
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Audience for self-contained and remote tokens
    #[arg(long, env = "AUDIENCE", default_value = "https://localhost:4567")]
    pub audience: String,

    /// Expected issuer of remote access tokens
    #[arg(long, env = "ISSUER")]
    pub issuer: Option<String>,

    /// JWKS endpoint of the authorization server
    #[arg(long, env = "JWKS_URL")]
    pub jwks_url: Option<String>,

    /// Signature algorithm of remote access tokens
    #[arg(long, env = "ACCESS_TOKEN_ALG", default_value = "RS256")]
    pub access_token_alg: String,

    /// Timeout for a single JWKS fetch in milliseconds
    #[arg(long, env = "JWKS_TIMEOUT_MS", default_value = "5000")]
    pub jwks_timeout_ms: u64,

    /// How long fetched JWKS keys are trusted in seconds
    #[arg(long, env = "JWKS_CACHE_TTL_SECONDS", default_value = "300")]
    pub jwks_cache_ttl_seconds: u64,

    /// Interval between expired-token purges in seconds
    #[arg(long, env = "PURGE_INTERVAL_SECONDS", default_value = "60")]
    pub purge_interval_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.token_ttl_seconds == 0 {
            return Err("TOKEN_TTL_SECONDS must be greater than zero".to_string());
        }
        if self.token_ttl_seconds > MAX_TOKEN_TTL_SECONDS {
            return Err(format!(
                "TOKEN_TTL_SECONDS must be at most {MAX_TOKEN_TTL_SECONDS}"
            ));
        }

        if self.default_scope.trim().is_empty() {
            return Err("DEFAULT_SCOPE must not be empty".to_string());
        }

        if self.token_store == TokenStoreKind::AccessToken {
            if self.jwks_url.is_none() {
                return Err("JWKS_URL is required for the access-token store".to_string());
            }
            if self.issuer.is_none() {
                return Err("ISSUER is required for the access-token store".to_string());
            }
            self.access_token_algorithm()?;
        }

        if self.token_transport == TokenTransport::Csrf
            && self.token_store != TokenStoreKind::Session
        {
            return Err("csrf transport requires the session token store".to_string());
        }

        Ok(())
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_seconds)
    }

    pub fn access_token_algorithm(&self) -> std::result::Result<Algorithm, String> {
        self.access_token_alg
            .parse()
            .map_err(|_| format!("Unknown ACCESS_TOKEN_ALG '{}'", self.access_token_alg))
    }

    pub fn key_set_cache_config(&self) -> KeySetCacheConfig {
        KeySetCacheConfig {
            ttl: Duration::from_secs(self.jwks_cache_ttl_seconds),
            fetch_timeout: Duration::from_millis(self.jwks_timeout_ms),
            ..Default::default()
        }
    }
}

/// Decoded key material for the selected token store.
#[derive(Default)]
pub struct KeyMaterial {
    pub mac_key: Option<MacKey>,
    pub encryption_key: Option<EncryptionKey>,
    pub jwt_secret: Option<Zeroizing<Vec<u8>>>,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("mac_key", &self.mac_key)
            .field("encryption_key", &self.encryption_key)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| ".."))
            .finish()
    }
}

impl KeyMaterial {
    /// Decode and check the keys the selected store needs.
    ///
    /// In dev mode missing keys are generated; otherwise they are required.
    pub fn from_args(args: &Args) -> Result<Self> {
        let kind = args.token_store;
        let mut keys = Self::default();

        if kind.needs_mac_key() {
            keys.mac_key = Some(match &args.hmac_key {
                Some(encoded) => MacKey::from_base64url(encoded)?,
                None if args.dev_mode => {
                    warn!("HMAC_KEY not set, generating an ephemeral key (dev mode)");
                    MacKey::generate()
                }
                None => return Err(GateError::Config("HMAC_KEY is required".into())),
            });
        }

        if kind.needs_encryption_key() {
            keys.encryption_key = Some(match &args.encryption_key {
                Some(encoded) => EncryptionKey::from_base64url(encoded)?,
                None if args.dev_mode => {
                    warn!("ENCRYPTION_KEY not set, generating an ephemeral key (dev mode)");
                    EncryptionKey::generate()
                }
                None => return Err(GateError::Config("ENCRYPTION_KEY is required".into())),
            });
        }

        if kind.needs_jwt_secret() {
            keys.jwt_secret = Some(match &args.jwt_secret {
                Some(encoded) => {
                    let secret = Zeroizing::new(codec::base64url_decode(encoded.trim()).ok_or_else(
                        || GateError::Config("JWT_SECRET is not valid base64url".into()),
                    )?);
                    if secret.len() < MIN_KEY_LEN {
                        return Err(GateError::Config(format!(
                            "JWT_SECRET must be at least {MIN_KEY_LEN} bytes"
                        )));
                    }
                    secret
                }
                None if args.dev_mode => {
                    warn!("JWT_SECRET not set, generating an ephemeral secret (dev mode)");
                    Zeroizing::new(codec::random_bytes::<MIN_KEY_LEN>().to_vec())
                }
                None => return Err(GateError::Config("JWT_SECRET is required".into())),
            });
        }

        keys.check_separation()?;
        Ok(keys)
    }

    /// Integrity and encryption must never share a key.
    fn check_separation(&self) -> Result<()> {
        if let (Some(mac), Some(enc)) = (&self.mac_key, &self.encryption_key) {
            if codec::constant_time_eq(mac.as_bytes(), enc.as_bytes()) {
                return Err(GateError::Config(
                    "HMAC_KEY and ENCRYPTION_KEY must be different".into(),
                ));
            }
        }
        Ok(())
    }
}
