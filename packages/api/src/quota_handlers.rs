// ABOUTME: HTTP request handler for rate limit introspection
// ABOUTME: Read-only window lookup so clients can show quota state without spending capacity

use axum::{extract::State, Json};
use serde::Serialize;
use tracing::debug;

use crate::identity::Caller;
use crate::AppState;

/// Current quota window for one caller
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatusResponse {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch milliseconds when the next slot frees up.
    pub reset: i64,
    pub authenticated: bool,
}

/// Report the caller's current rate limit window
///
/// GET /api/rate-limit-status
///
/// Never consumes capacity; polling this endpoint cannot lock a caller out.
pub async fn rate_limit_status(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> Json<RateLimitStatusResponse> {
    debug!("Rate limit status requested by {}", identity);

    let decision = state.limiter.status(&identity).await;
    Json(RateLimitStatusResponse {
        allowed: decision.allowed,
        limit: decision.limit,
        remaining: decision.remaining,
        reset: decision.reset_at.timestamp_millis(),
        authenticated: identity.is_authenticated(),
    })
}
