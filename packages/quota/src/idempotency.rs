// ABOUTME: Idempotency guard: first-writer-wins claim on a client-supplied submission key
// ABOUTME: Claims carry a short TTL so a crashed orchestrator cannot block a key forever

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::memory::MemoryIdempotencyStore;
use crate::store::{IdempotencyStore, STATUS_PENDING};

const KEY_PREFIX: &str = "submission";

/// Outcome of claiming a submission key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The key is ours. The caller must `finish` it on every exit path.
    Claimed,
    /// Another submission with the same key is already in flight.
    Duplicate { existing_status: String },
}

/// Guards against duplicate execution of retried submissions. Two
/// concurrent `begin`s with the same key admit exactly one caller; the
/// claim is dropped at `finish` or reaped by its TTL.
pub struct IdempotencyGuard {
    ttl: Duration,
    store: Arc<dyn IdempotencyStore>,
    fallback: MemoryIdempotencyStore,
}

impl IdempotencyGuard {
    pub fn new(ttl: Duration, store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            ttl,
            store,
            fallback: MemoryIdempotencyStore::new(),
        }
    }

    pub async fn begin(&self, key: &str) -> Admission {
        let store_key = self.key_for(key);
        match self
            .store
            .put_if_absent(&store_key, STATUS_PENDING, self.ttl)
            .await
        {
            Ok(None) => Admission::Claimed,
            Ok(Some(existing_status)) => Admission::Duplicate { existing_status },
            Err(e) => {
                warn!(
                    "Idempotency store unreachable, using in-process claims for {}: {}",
                    key, e
                );
                match self.fallback.claim(&store_key, STATUS_PENDING, self.ttl) {
                    None => Admission::Claimed,
                    Some(existing_status) => Admission::Duplicate { existing_status },
                }
            }
        }
    }

    /// Release a claim. Best-effort: the response has already been
    /// streamed by the time this runs, so failures are logged and the
    /// TTL is left to reap the marker.
    pub async fn finish(&self, key: &str) {
        let store_key = self.key_for(key);
        self.fallback.release(&store_key);
        if let Err(e) = self.store.remove(&store_key).await {
            warn!("Failed to release idempotency key {}: {}", key, e);
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key_for(&self, key: &str) -> String {
        format!("{}:{}", KEY_PREFIX, key)
    }
}
