// ABOUTME: HTTP API layer for Patchbox providing REST endpoints and routing
// ABOUTME: Integration layer that wires the quota, challenge and engine packages behind axum

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use patchbox_challenges::ChallengeStore;
use patchbox_engine::Orchestrator;
use patchbox_quota::{IdempotencyGuard, RateLimiter};

pub mod challenge_handlers;
pub mod error;
pub mod health_handlers;
pub mod identity;
pub mod quota_handlers;
pub mod submit_handlers;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{ApiError, ApiResult};
pub use identity::Caller;

/// Shared state for the submission pipeline
#[derive(Clone)]
pub struct AppState {
    pub challenges: Arc<dyn ChallengeStore>,
    pub limiter: Arc<RateLimiter>,
    pub guard: Arc<IdempotencyGuard>,
    pub orchestrator: Arc<Orchestrator>,
}

/// Creates the API router
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handlers::health_check))
        .route("/api/status", get(health_handlers::status_check))
        .route("/api/challenges", get(challenge_handlers::list_challenges))
        .route(
            "/api/challenges/{id}",
            get(challenge_handlers::get_challenge),
        )
        .route("/api/submit", post(submit_handlers::submit))
        .route(
            "/api/rate-limit-status",
            get(quota_handlers::rate_limit_status),
        )
        .with_state(state)
}
