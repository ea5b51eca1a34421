//! natter-gate - token issuance and authorization gates for the Natter API

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use natter_gate::{
    config::{Args, KeyMaterial},
    db::{
        InMemoryPermissionRepository, InMemoryTokenRepository, InMemoryUserRepository,
        MongoClient, MongoPermissionRepository, MongoTokenRepository, MongoUserRepository,
        PermissionRepository, TokenRepository, UserRepository,
    },
    server::{self, AppState},
    token::{build_token_store, DatabaseTokenStore, SessionStore, StoreDependencies},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("natter_gate={},info", args.log_level).into());
    let fmt_layer = if args.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let keys = match KeyMaterial::from_args(&args) {
        Ok(keys) => keys,
        Err(e) => {
            error!("Key configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!("======================================");
    info!("  natter-gate");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Token store: {:?}", args.token_store);
    info!("Token transport: {:?}", args.token_transport);
    info!("Token TTL: {}s", args.token_ttl_seconds);
    info!("MongoDB: {}", args.mongodb_uri);
    info!("======================================");

    // Connect to MongoDB (optional in dev mode)
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Some(client)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory storage): {}", e);
                None
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let (tokens, users, permissions): (
        Arc<dyn TokenRepository>,
        Arc<dyn UserRepository>,
        Arc<dyn PermissionRepository>,
    ) = match &mongo {
        Some(client) => (
            Arc::new(MongoTokenRepository::new(client).await?),
            Arc::new(MongoUserRepository::new(client).await?),
            Arc::new(MongoPermissionRepository::new(client).await?),
        ),
        None => (
            Arc::new(InMemoryTokenRepository::new()),
            Arc::new(InMemoryUserRepository::new()),
            Arc::new(InMemoryPermissionRepository::new()),
        ),
    };

    let sessions = Arc::new(SessionStore::new());
    let store = build_token_store(
        &args,
        &keys,
        StoreDependencies {
            token_repo: tokens.clone(),
            sessions: sessions.clone(),
            key_source: None,
        },
    )?;

    spawn_purge_task(
        &args,
        args.token_store.uses_token_repository().then(|| DatabaseTokenStore::new(tokens)),
        sessions,
    );

    let state = Arc::new(AppState::new(args, store, users, permissions));
    server::run(state).await?;

    Ok(())
}

/// Periodically drop expired token rows and sessions.
fn spawn_purge_task(args: &Args, tokens: Option<DatabaseTokenStore>, sessions: Arc<SessionStore>) {
    let period = Duration::from_secs(args.purge_interval_seconds.max(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Some(tokens) = &tokens {
                if let Err(e) = tokens.delete_expired_tokens().await {
                    warn!("Expired token purge failed: {}", e);
                }
            }
            let purged = sessions.purge_expired();
            if purged > 0 {
                info!(purged, "Purged expired sessions");
            }
        }
    });
}
