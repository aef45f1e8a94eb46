// ABOUTME: Admission control package for Patchbox
// ABOUTME: Sliding-window rate limiting and idempotency claims over shared or in-process stores

pub mod error;
pub mod identity;
pub mod idempotency;
pub mod limiter;
pub mod memory;
pub mod rest;
pub mod store;

pub use error::{QuotaError, Result};
pub use identity::CallerIdentity;
pub use idempotency::{Admission, IdempotencyGuard};
pub use limiter::RateLimiter;
pub use memory::{MemoryIdempotencyStore, MemoryQuotaStore};
pub use rest::RedisRestStore;
pub use store::{IdempotencyStore, QuotaDecision, QuotaPolicy, QuotaStore, STATUS_PENDING};
