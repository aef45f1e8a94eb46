// ABOUTME: Patchbox server binary wiring stores, sandbox provider and the HTTP router
// ABOUTME: Reads configuration from the environment and serves the submission API

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::middleware;
use patchbox_api::{create_api_router, AppState};
use patchbox_challenges::{CatalogStore, ChallengeStore, SqliteChallengeStore};
use patchbox_engine::{EngineConfig, Orchestrator};
use patchbox_quota::{
    IdempotencyGuard, IdempotencyStore, MemoryIdempotencyStore, MemoryQuotaStore, QuotaStore,
    RateLimiter, RedisRestStore,
};
use patchbox_sandbox::HttpSandboxProvider;
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::Sqlite;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod auth;
mod config;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let config = Config::from_env()?;

    println!("🚀 Starting Patchbox server...");
    println!("📡 Server will run on http://localhost:{}", config.port);
    println!("🔗 CORS origin: {}", config.cors_origin);

    let challenges = build_challenge_store(&config).await?;
    let (quota_store, idempotency_store) = build_quota_stores(&config)?;

    let limiter = Arc::new(RateLimiter::new(config.quota_policy, quota_store));
    let guard = Arc::new(IdempotencyGuard::new(
        config.idempotency_ttl,
        idempotency_store,
    ));

    let provider = Arc::new(HttpSandboxProvider::new(
        config.sandbox_api_url.clone(),
        config.sandbox_api_key.clone(),
    )?);
    let orchestrator = Arc::new(Orchestrator::new(provider, EngineConfig::default()));

    let state = AppState {
        challenges,
        limiter,
        guard,
        orchestrator,
    };

    let tokens: Arc<HashMap<String, String>> =
        Arc::new(config.api_tokens.iter().cloned().collect());
    if !tokens.is_empty() {
        info!("Loaded {} API tokens", tokens.len());
    }

    // Create CORS layer
    let cors = CorsLayer::new()
        .allow_origin(config.cors_origin.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = create_api_router(state)
        .layer(middleware::from_fn_with_state(
            tokens,
            auth::bearer_identity_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    println!("✅ Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

/// SQLite-backed store when DATABASE_URL is set, bundled catalog otherwise.
async fn build_challenge_store(config: &Config) -> anyhow::Result<Arc<dyn ChallengeStore>> {
    let fallback = CatalogStore::bundled()?;
    info!("Bundled challenge catalog: {} challenges", fallback.len());

    let Some(database_url) = &config.database_url else {
        info!("DATABASE_URL not set, serving the bundled challenge catalog");
        return Ok(Arc::new(fallback));
    };

    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        info!("Creating challenge database: {}", database_url);
        Sqlite::create_database(database_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    SqliteChallengeStore::init_schema(&pool).await?;

    info!("Challenge store backed by SQLite: {}", database_url);
    Ok(Arc::new(SqliteChallengeStore::new(Arc::new(pool), fallback)))
}

/// Shared Redis REST stores when configured, in-process stores otherwise.
/// A single REST client backs both the rate-limit and idempotency sides.
fn build_quota_stores(
    config: &Config,
) -> anyhow::Result<(Arc<dyn QuotaStore>, Arc<dyn IdempotencyStore>)> {
    match (&config.redis_rest_url, &config.redis_rest_token) {
        (Some(url), Some(token)) => {
            info!("Quota stores backed by Redis REST: {}", url);
            let store = Arc::new(RedisRestStore::new(url.clone(), token.clone())?);
            Ok((store.clone(), store))
        }
        _ => {
            warn!("REDIS_REST_URL/REDIS_REST_TOKEN not set, rate limiting and idempotency are per-instance only");
            Ok((
                Arc::new(MemoryQuotaStore::new()),
                Arc::new(MemoryIdempotencyStore::new()),
            ))
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, draining connections"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
