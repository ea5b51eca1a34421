//! Remote JSON Web Key Set cache
//!
//! Verification keys for remotely issued access tokens are fetched from the
//! authorization server's JWKS endpoint and cached.
//!
//! # Refresh
//!
//! - Keys are refreshed when the cache is older than `ttl`, or when no cached
//!   key matches a token's `kid`/`alg`.
//! - Refreshes are single-flight: concurrent misses wait on one fetch
//!   instead of each hitting the network.
//! - All refreshes are rate limited by `min_refresh_interval`, so neither a
//!   stream of unknown key ids nor a failing issuer can cause a fetch storm.
//!   Stale keys keep serving in between.
//! - Every fetch is bounded by `fetch_timeout`. A failed or timed out fetch
//!   keeps the previous keys.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::{JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::types::{GateError, Result};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct KeySetCacheConfig {
    /// How long fetched keys are trusted before a refresh
    pub ttl: Duration,

    /// Minimum spacing between fetch attempts
    pub min_refresh_interval: Duration,

    /// Upper bound on a single fetch
    pub fetch_timeout: Duration,
}

impl Default for KeySetCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            min_refresh_interval: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Sources
// =============================================================================

/// Where key sets come from.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    async fn fetch(&self) -> Result<JwkSet>;
}

/// Fetches a key set over HTTPS.
pub struct HttpKeySetSource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySetSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GateError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch(&self) -> Result<JwkSet> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| GateError::KeySet(format!("Key set request failed: {e}")))?;

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| GateError::KeySet(format!("Invalid key set: {e}")))
    }
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Clone)]
struct CachedKey {
    kid: Option<String>,
    algorithm: Option<Algorithm>,
    key: DecodingKey,
}

impl CachedKey {
    fn matches(&self, kid: Option<&str>, algorithm: Algorithm) -> bool {
        let kid_ok = match kid {
            Some(kid) => self.kid.as_deref() == Some(kid),
            None => true,
        };
        let alg_ok = self.algorithm.map_or(true, |a| a == algorithm);
        kid_ok && alg_ok
    }
}

#[derive(Default)]
struct CacheState {
    keys: Vec<CachedKey>,
    fetched_at: Option<Instant>,
    attempted_at: Option<Instant>,
}

/// Signature algorithms a JWK `alg` may name.
fn signing_algorithm(alg: &KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}

fn parse_key_set(set: &JwkSet) -> Vec<CachedKey> {
    set.keys
        .iter()
        .filter(|jwk| !matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)))
        .filter_map(|jwk| {
            let algorithm = match &jwk.common.key_algorithm {
                Some(alg) => Some(signing_algorithm(alg)?),
                None => None,
            };
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => Some(CachedKey {
                    kid: jwk.common.key_id.clone(),
                    algorithm,
                    key,
                }),
                Err(e) => {
                    debug!(kid = ?jwk.common.key_id, error = %e, "Skipping unusable JWK");
                    None
                }
            }
        })
        .collect()
}

/// Shared, single-flight cache of remote verification keys.
pub struct KeySetCache {
    source: Arc<dyn KeySetSource>,
    config: KeySetCacheConfig,
    state: RwLock<CacheState>,
    refresh_lock: Mutex<()>,
    /// Bumped after every fetch attempt
    generation: AtomicU64,
}

impl KeySetCache {
    pub fn new(source: Arc<dyn KeySetSource>, config: KeySetCacheConfig) -> Self {
        Self {
            source,
            config,
            state: RwLock::new(CacheState::default()),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Candidate verification keys for a token header.
    ///
    /// Returns an empty list when no key matches, even after a refresh.
    pub async fn select(&self, kid: Option<&str>, algorithm: Algorithm) -> Vec<DecodingKey> {
        let observed = self.generation.load(Ordering::Acquire);
        {
            let state = self.state.read().await;
            if self.is_fresh(&state) {
                let keys = Self::matching(&state, kid, algorithm);
                if !keys.is_empty() {
                    return keys;
                }
            }
        }

        self.refresh(observed).await;

        let state = self.state.read().await;
        Self::matching(&state, kid, algorithm)
    }

    /// Number of keys currently cached.
    pub async fn len(&self) -> usize {
        self.state.read().await.keys.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn is_fresh(&self, state: &CacheState) -> bool {
        state
            .fetched_at
            .is_some_and(|at| at.elapsed() < self.config.ttl)
    }

    fn matching(state: &CacheState, kid: Option<&str>, algorithm: Algorithm) -> Vec<DecodingKey> {
        state
            .keys
            .iter()
            .filter(|k| k.matches(kid, algorithm))
            .map(|k| k.key.clone())
            .collect()
    }

    async fn refresh(&self, observed: u64) {
        let _guard = self.refresh_lock.lock().await;

        // Someone else fetched while we waited
        if self.generation.load(Ordering::Acquire) != observed {
            return;
        }

        // Stale keys keep serving until the next attempt is allowed
        {
            let state = self.state.read().await;
            let recently_attempted = state
                .attempted_at
                .is_some_and(|at| at.elapsed() < self.config.min_refresh_interval);
            if recently_attempted {
                debug!("Key set refresh suppressed by minimum interval");
                return;
            }
        }

        let fetched = tokio::time::timeout(self.config.fetch_timeout, self.source.fetch()).await;

        let mut state = self.state.write().await;
        state.attempted_at = Some(Instant::now());
        match fetched {
            Ok(Ok(set)) => {
                state.keys = parse_key_set(&set);
                state.fetched_at = Some(Instant::now());
                info!(keys = state.keys.len(), "Refreshed remote key set");
            }
            Ok(Err(e)) => warn!(error = %e, "Key set fetch failed"),
            Err(_) => warn!(
                timeout_ms = self.config.fetch_timeout.as_millis() as u64,
                "Key set fetch timed out"
            ),
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}
