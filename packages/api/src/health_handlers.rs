// ABOUTME: Health and status endpoints for load balancers and diagnostics
// ABOUTME: Status additionally reports the active rate-limit policy

use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().timestamp(),
        "version": env!("CARGO_PKG_VERSION"),
        "service": "patchbox"
    }))
}

pub async fn status_check(State(state): State<AppState>) -> Json<Value> {
    let policy = state.limiter.policy();

    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().timestamp(),
        "version": env!("CARGO_PKG_VERSION"),
        "service": "patchbox",
        "quota": {
            "limit": policy.limit,
            "windowSeconds": policy.window.as_secs()
        }
    }))
}
