//! Fixed-window rate limiting over a shared counter store.

mod cleanup;
mod key;
mod limiter;
mod policy;
mod store;
mod window;

pub use cleanup::CleanupJob;
pub use key::{Environment, RateLimitKey, StorageKey};
pub use limiter::{RateLimitDecision, RateLimiter};
pub use policy::{RateLimitPolicies, RateLimitPolicy};
pub use store::{CounterStore, MemoryCounterStore, RateLimitRecord, SqliteCounterStore};
pub use window::FixedWindow;
