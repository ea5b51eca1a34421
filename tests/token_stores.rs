//! Behaviour shared by every token store stack.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hyper::{HeaderMap, Method};

use natter_gate::db::{InMemoryTokenRepository, TokenRecord, TokenRepository};
use natter_gate::token::{
    DatabaseTokenStore, EncryptedJwtTokenStore, EncryptedTokenStore, EncryptionKey,
    HmacTokenStore, MacKey, SessionStore, SessionTokenStore, SignedJwtTokenStore,
};
use natter_gate::{RequestContext, Result, Token, TokenLookup, TokenStore};

const AUDIENCE: &str = "https://api.example";

fn ctx() -> RequestContext {
    RequestContext::new(Method::POST, HeaderMap::new())
}

fn token(ttl: Duration) -> Token {
    Token::new("alice", Utc::now() + ttl)
        .unwrap()
        .with_attribute("scope", "read_message post_message")
}

fn database() -> Box<dyn TokenStore> {
    Box::new(DatabaseTokenStore::new(Arc::new(InMemoryTokenRepository::new())))
}

/// Every self-validating stack, paired with a name for assertion messages.
fn stacks() -> Vec<(&'static str, Box<dyn TokenStore>)> {
    vec![
        ("database", database()),
        (
            "hmac",
            Box::new(HmacTokenStore::new(database(), MacKey::generate())),
        ),
        (
            "encrypted",
            Box::new(HmacTokenStore::new(
                Box::new(EncryptedTokenStore::new(database(), EncryptionKey::generate())),
                MacKey::generate(),
            )),
        ),
        (
            "jwt",
            Box::new(SignedJwtTokenStore::hmac(&[7u8; 32], AUDIENCE)),
        ),
        (
            "encrypted-jwt",
            Box::new(EncryptedJwtTokenStore::new(EncryptionKey::generate(), AUDIENCE)),
        ),
    ]
}

/// Replace the character at `index` with a different base64url character.
fn tamper(id: &str, index: usize) -> String {
    id.char_indices()
        .map(|(i, c)| {
            if i != index {
                c
            } else if c == 'A' {
                'B'
            } else {
                'A'
            }
        })
        .collect()
}

#[tokio::test]
async fn test_issued_token_reads_back() {
    for (name, store) in stacks() {
        let issued = token(Duration::minutes(10));
        let mut ctx = ctx();
        let id = store.create(&mut ctx, &issued).await.unwrap();

        let read = store.read(&ctx, &id).await.unwrap();
        assert_eq!(read, Some(issued), "{name}");
    }
}

#[tokio::test]
async fn test_single_character_tamper_is_rejected() {
    for (name, store) in stacks().into_iter().filter(|(n, _)| *n != "database") {
        let mut ctx = ctx();
        let id = store.create(&mut ctx, &token(Duration::minutes(10))).await.unwrap();

        for index in 0..id.len() {
            let forged = tamper(&id, index);
            assert_eq!(
                store.read(&ctx, &forged).await.unwrap(),
                None,
                "{name}: tamper at {index} accepted"
            );
        }
    }
}

#[tokio::test]
async fn test_garbage_identifiers_are_absent() {
    for (name, store) in stacks() {
        for garbage in ["", ".", "..", "not-a-token", "a.b.c", "a..b.c.d", "%%%"] {
            assert_eq!(
                store.lookup(&ctx(), garbage).await.unwrap(),
                TokenLookup::Missing,
                "{name}: {garbage:?}"
            );
        }
    }
}

#[tokio::test]
async fn test_expired_tokens_are_never_returned() {
    for (name, store) in stacks() {
        let mut ctx = ctx();
        let id = store
            .create(&mut ctx, &token(Duration::seconds(-5)))
            .await
            .unwrap();

        assert_eq!(store.read(&ctx, &id).await.unwrap(), None, "{name}");
        assert!(store.lookup(&ctx, &id).await.unwrap().is_expired(), "{name}");
    }
}

#[tokio::test]
async fn test_revocation_is_final_and_idempotent() {
    for (name, store) in stacks().into_iter().filter(|(_, s)| s.supports_revocation()) {
        let mut ctx = ctx();
        let id = store.create(&mut ctx, &token(Duration::minutes(10))).await.unwrap();

        store.revoke(&mut ctx, &id).await.unwrap();
        assert_eq!(store.read(&ctx, &id).await.unwrap(), None, "{name}");

        store.revoke(&mut ctx, &id).await.unwrap();
        store.revoke(&mut ctx, "never-issued").await.unwrap();
    }
}

#[tokio::test]
async fn test_stateless_revoke_is_unsupported() {
    for (name, store) in stacks().into_iter().filter(|(_, s)| !s.supports_revocation()) {
        let mut ctx = ctx();
        let id = store.create(&mut ctx, &token(Duration::minutes(10))).await.unwrap();

        let err = store.revoke(&mut ctx, &id).await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::NOT_IMPLEMENTED, "{name}");
        // Still valid after the failed revoke
        assert!(store.read(&ctx, &id).await.unwrap().is_some(), "{name}");
    }
}

#[tokio::test]
async fn test_opaque_identifiers_are_unique() {
    // Signed JWTs are deterministic for identical claims
    for (name, store) in stacks().into_iter().filter(|(n, _)| *n != "jwt") {
        let issued = token(Duration::minutes(10));
        let mut ctx = ctx();
        let a = store.create(&mut ctx, &issued).await.unwrap();
        let b = store.create(&mut ctx, &issued).await.unwrap();
        assert_ne!(a, b, "{name}");
    }
}

// =============================================================================
// HMAC wrapper short-circuits before the database
// =============================================================================

#[derive(Default)]
struct CountingTokenRepository {
    rows: InMemoryTokenRepository,
    finds: AtomicUsize,
    deletes: AtomicUsize,
}

#[async_trait]
impl TokenRepository for CountingTokenRepository {
    async fn insert(&self, record: TokenRecord) -> Result<()> {
        self.rows.insert(record).await
    }

    async fn find(&self, token_hash: &str) -> Result<Option<TokenRecord>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.rows.find(token_hash).await
    }

    async fn delete(&self, token_hash: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.rows.delete(token_hash).await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.rows.delete_expired(now).await
    }
}

#[tokio::test]
async fn test_forged_tag_never_reaches_repository() {
    let repo = Arc::new(CountingTokenRepository::default());
    let store = HmacTokenStore::new(
        Box::new(DatabaseTokenStore::new(repo.clone())),
        MacKey::generate(),
    );
    let mut ctx = ctx();
    let id = store.create(&mut ctx, &token(Duration::minutes(10))).await.unwrap();

    let forged = tamper(&id, id.len() - 2);
    assert_eq!(store.read(&ctx, &forged).await.unwrap(), None);
    store.revoke(&mut ctx, &forged).await.unwrap();
    assert_eq!(repo.finds.load(Ordering::SeqCst), 0);
    assert_eq!(repo.deletes.load(Ordering::SeqCst), 0);

    // The genuine identifier still works and was not revoked
    assert!(store.read(&ctx, &id).await.unwrap().is_some());
    assert_eq!(repo.finds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_database_purges_expired_rows() {
    let repo = Arc::new(InMemoryTokenRepository::new());
    let store = DatabaseTokenStore::new(repo.clone());
    let mut ctx = ctx();

    store.create(&mut ctx, &token(Duration::seconds(-1))).await.unwrap();
    let live = store.create(&mut ctx, &token(Duration::minutes(10))).await.unwrap();

    assert_eq!(store.delete_expired_tokens().await.unwrap(), 1);
    assert_eq!(repo.len(), 1);
    assert!(store.read(&ctx, &live).await.unwrap().is_some());
}

// =============================================================================
// Session store
// =============================================================================

fn session_cookie(ctx: &RequestContext) -> String {
    let set_cookie = ctx
        .response_headers()
        .get_all(hyper::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("natter_session=") && !v.contains("Max-Age=0"))
        .unwrap()
        .to_string();
    set_cookie.split(';').next().unwrap().to_string()
}

fn with_cookie(cookie: &str) -> RequestContext {
    let mut headers = HeaderMap::new();
    headers.insert(hyper::header::COOKIE, cookie.parse().unwrap());
    RequestContext::new(Method::GET, headers)
}

#[tokio::test]
async fn test_session_token_bound_to_cookie() {
    let sessions = Arc::new(SessionStore::new());
    let store = SessionTokenStore::new(sessions.clone());

    let mut login = ctx();
    let csrf = store.create(&mut login, &token(Duration::minutes(10))).await.unwrap();
    let cookie = session_cookie(&login);

    let request = with_cookie(&cookie);
    let read = store.read(&request, &csrf).await.unwrap().unwrap();
    assert_eq!(read.subject(), "alice");

    // Token without the cookie, or for another session, is absent
    assert_eq!(store.read(&ctx(), &csrf).await.unwrap(), None);
    let mut other = ctx();
    let other_csrf = store.create(&mut other, &token(Duration::minutes(10))).await.unwrap();
    assert_eq!(store.read(&request, &other_csrf).await.unwrap(), None);
    assert_eq!(sessions.len(), 2);
}

#[tokio::test]
async fn test_session_revoke_ends_session() {
    let sessions = Arc::new(SessionStore::new());
    let store = SessionTokenStore::new(sessions.clone());

    let mut login = ctx();
    let csrf = store.create(&mut login, &token(Duration::minutes(10))).await.unwrap();
    let mut request = with_cookie(&session_cookie(&login));

    store.revoke(&mut request, &csrf).await.unwrap();
    assert!(sessions.is_empty());
    assert_eq!(store.read(&request, &csrf).await.unwrap(), None);
    store.revoke(&mut request, &csrf).await.unwrap();
}

#[test]
fn test_attribute_maps_compare_by_content() {
    let attrs: HashMap<String, String> =
        [("scope".to_string(), "a b".to_string())].into_iter().collect();
    let expiry = Utc::now() + Duration::minutes(1);
    let a = Token::new("alice", expiry).unwrap().with_attributes(attrs.clone());
    let b = Token::new("alice", expiry).unwrap().with_attribute("scope", "a b");
    assert_eq!(a, b);
}
