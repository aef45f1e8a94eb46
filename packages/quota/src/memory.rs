// ABOUTME: In-process quota and idempotency stores used when no shared store is configured
// ABOUTME: Correct for a single instance only; multiple instances each see their own counts

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::store::{IdempotencyStore, QuotaDecision, QuotaPolicy, QuotaStore};

// Sweep expired keys every N hits to bound memory growth.
const CLEANUP_INTERVAL: u64 = 100;

/// Sliding-window counter over an in-process map of hit timestamps.
///
/// This is the fallback path: it cannot coordinate across instances,
/// so behind a load balancer each instance enforces its own window.
pub struct MemoryQuotaStore {
    hits: Mutex<HashMap<String, Vec<Instant>>>,
    hit_count: AtomicU64,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self {
            hits: Mutex::new(HashMap::new()),
            hit_count: AtomicU64::new(0),
        }
    }

    /// Record a submission attempt against `key`. Denied attempts are
    /// not recorded, so capacity frees as accepted hits age out.
    pub fn record(&self, key: &str, policy: QuotaPolicy) -> QuotaDecision {
        let count = self.hit_count.fetch_add(1, Ordering::Relaxed);
        if count > 0 && count % CLEANUP_INTERVAL == 0 {
            self.cleanup(policy.window);
        }

        let now = Instant::now();
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        let timestamps = hits.entry(key.to_string()).or_default();
        prune(timestamps, now, policy.window);

        let allowed = (timestamps.len() as u32) < policy.limit;
        if allowed {
            timestamps.push(now);
        }
        decision(timestamps, now, policy, allowed)
    }

    /// Evaluate `key` without consuming capacity.
    pub fn usage(&self, key: &str, policy: QuotaPolicy) -> QuotaDecision {
        let now = Instant::now();
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        match hits.get_mut(key) {
            Some(timestamps) => {
                prune(timestamps, now, policy.window);
                let allowed = (timestamps.len() as u32) < policy.limit;
                decision(timestamps, now, policy, allowed)
            }
            None => decision(&[], now, policy, policy.limit > 0),
        }
    }

    /// Drop keys whose every hit has left the window.
    pub fn cleanup(&self, window: Duration) {
        let now = Instant::now();
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        hits.retain(|_, timestamps| {
            prune(timestamps, now, window);
            !timestamps.is_empty()
        });
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for MemoryQuotaStore {
    fn default() -> Self {
        Self::new()
    }
}

fn prune(timestamps: &mut Vec<Instant>, now: Instant, window: Duration) {
    timestamps.retain(|&t| now.duration_since(t) < window);
}

fn decision(timestamps: &[Instant], now: Instant, policy: QuotaPolicy, allowed: bool) -> QuotaDecision {
    let used = timestamps.len() as u32;
    let reset_at = match timestamps.iter().min() {
        Some(&oldest) => {
            let spent = now.duration_since(oldest);
            let left = policy.window.saturating_sub(spent);
            Utc::now() + chrono::Duration::from_std(left).unwrap_or_else(|_| chrono::Duration::zero())
        }
        None => Utc::now(),
    };

    QuotaDecision {
        allowed,
        limit: policy.limit,
        remaining: policy.limit.saturating_sub(used),
        reset_at,
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn hit(&self, key: &str, policy: QuotaPolicy) -> Result<QuotaDecision> {
        Ok(self.record(key, policy))
    }

    async fn peek(&self, key: &str, policy: QuotaPolicy) -> Result<QuotaDecision> {
        Ok(self.usage(key, policy))
    }
}

struct ClaimEntry {
    status: String,
    expires_at: Instant,
}

/// Set-if-absent marker map with TTL, the in-process counterpart of the
/// shared idempotency store. Same single-instance caveat as above.
pub struct MemoryIdempotencyStore {
    entries: Mutex<HashMap<String, ClaimEntry>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Claim `key`, returning the holder's status when already taken.
    pub fn claim(&self, key: &str, status: &str, ttl: Duration) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, entry| entry.expires_at > now);

        match entries.get(key) {
            Some(existing) => Some(existing.status.clone()),
            None => {
                entries.insert(
                    key.to_string(),
                    ClaimEntry {
                        status: status.to_string(),
                        expires_at: now + ttl,
                    },
                );
                None
            }
        }
    }

    pub fn release(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }
}

impl Default for MemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn put_if_absent(
        &self,
        key: &str,
        status: &str,
        ttl: Duration,
    ) -> Result<Option<String>> {
        Ok(self.claim(key, status, ttl))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.release(key);
        Ok(())
    }
}
