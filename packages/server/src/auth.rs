// ABOUTME: Bearer-token middleware resolving the caller identity for quota accounting
// ABOUTME: Known tokens map to user identities; everything else stays anonymous

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use patchbox_quota::CallerIdentity;
use tracing::{debug, warn};

/// Resolves the Authorization header against the static token table and
/// stashes the matching identity as a request extension. Requests without
/// a recognized token pass through untouched and fall back to IP identity.
pub async fn bearer_identity_middleware(
    State(tokens): State<Arc<HashMap<String, String>>>,
    mut request: Request,
    next: Next,
) -> Response {
    let bearer = request
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if let Some(token) = bearer {
        match tokens.get(token) {
            Some(user_id) => {
                debug!("Authenticated request for user: {}", user_id);
                request
                    .extensions_mut()
                    .insert(CallerIdentity::User(user_id.clone()));
            }
            None => {
                warn!("Request carried an unrecognized API token");
            }
        }
    }

    next.run(request).await
}
