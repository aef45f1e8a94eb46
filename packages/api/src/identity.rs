// ABOUTME: Caller identity extraction for admission control
// ABOUTME: Authenticated identity comes from request extensions; anonymous callers are keyed by client address

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use patchbox_quota::CallerIdentity;

/// Extracts who is making the request. Auth middleware that has already
/// resolved a user inserts a `CallerIdentity` extension; everyone else is
/// anonymous and keyed by client address, taken from the first hop of
/// `x-forwarded-for` when present (this service runs behind a proxy that
/// sets it) and the peer address otherwise.
pub struct Caller(pub CallerIdentity);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<CallerIdentity>() {
            return Ok(Caller(identity.clone()));
        }
        Ok(Caller(CallerIdentity::Anonymous(client_address(parts))))
    }
}

fn client_address(parts: &Parts) -> String {
    let forwarded_hop = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());
    if let Some(hop) = forwarded_hop {
        return hop.to_string();
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|connect_info| connect_info.0.ip().to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}
