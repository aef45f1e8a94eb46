// ABOUTME: Store seams for the rate limiter and the idempotency guard
// ABOUTME: Shared-store and in-process implementations sit behind these traits

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::Result;

/// Marker stored while a submission is executing.
pub const STATUS_PENDING: &str = "pending";

/// Sliding-window policy: at most `limit` accepted submissions per
/// rolling `window` per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            limit: 5,
            window: Duration::from_secs(600),
        }
    }
}

/// Outcome of evaluating one key against the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the oldest counted submission leaves the window and one
    /// slot frees up.
    pub reset_at: DateTime<Utc>,
}

/// Sliding-window counter with TTL semantics keyed by caller identity.
///
/// Implementations must be safe under concurrent callers: two
/// simultaneous `hit`s on the last free slot must admit exactly one.
/// Denied hits leave no trace, so a denial never extends the lockout.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Record a submission attempt and evaluate it against the policy.
    async fn hit(&self, key: &str, policy: QuotaPolicy) -> Result<QuotaDecision>;

    /// Evaluate the current window without consuming capacity.
    async fn peek(&self, key: &str, policy: QuotaPolicy) -> Result<QuotaDecision>;
}

/// Set-if-absent marker store backing the idempotency guard.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically claim `key`. Returns `None` when the claim succeeded,
    /// or the already-stored status when another holder got there first.
    async fn put_if_absent(&self, key: &str, status: &str, ttl: Duration)
        -> Result<Option<String>>;

    /// Drop the marker. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}
