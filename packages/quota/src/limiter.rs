// ABOUTME: Rate limiter front combining the shared store with an in-process degradation path
// ABOUTME: Checked before any idempotency bookkeeping or sandbox work; a rejection is side-effect-free

use std::sync::Arc;
use tracing::warn;

use crate::identity::CallerIdentity;
use crate::memory::MemoryQuotaStore;
use crate::store::{QuotaDecision, QuotaPolicy, QuotaStore};

const KEY_PREFIX: &str = "ratelimit";

/// Sliding-window rate limiter keyed by caller identity.
///
/// Decisions are infallible: when the shared store cannot be reached,
/// the in-process window answers instead and the degradation is logged.
/// The in-process window only sees this instance's traffic.
pub struct RateLimiter {
    policy: QuotaPolicy,
    store: Arc<dyn QuotaStore>,
    fallback: MemoryQuotaStore,
}

impl RateLimiter {
    pub fn new(policy: QuotaPolicy, store: Arc<dyn QuotaStore>) -> Self {
        Self {
            policy,
            store,
            fallback: MemoryQuotaStore::new(),
        }
    }

    /// Count a submission attempt and decide it.
    pub async fn check(&self, identity: &CallerIdentity) -> QuotaDecision {
        let key = self.key_for(identity);
        match self.store.hit(&key, self.policy).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    "Quota store unreachable, using in-process window for {}: {}",
                    identity, e
                );
                self.fallback.record(&key, self.policy)
            }
        }
    }

    /// Read the current window without consuming capacity.
    pub async fn status(&self, identity: &CallerIdentity) -> QuotaDecision {
        let key = self.key_for(identity);
        match self.store.peek(&key, self.policy).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    "Quota store unreachable, reading in-process window for {}: {}",
                    identity, e
                );
                self.fallback.usage(&key, self.policy)
            }
        }
    }

    pub fn policy(&self) -> QuotaPolicy {
        self.policy
    }

    fn key_for(&self, identity: &CallerIdentity) -> String {
        format!("{}:{}", KEY_PREFIX, identity.quota_key())
    }
}
