//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use super::key::{Environment, RateLimitKey, StorageKey};
use super::policy::RateLimitPolicy;
use super::store::CounterStore;
use super::window::FixedWindow;
use crate::clock::{Clock, SystemClock};
use crate::error::{BulwarkError, Result};

/// Default upper bound on a single store round-trip.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    /// Whether the request is within quota
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u64,
    /// Start of the next window
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    fn denied(reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at,
        }
    }

    /// Time from `now` until the window resets.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        crate::clock::remaining_until(now, self.reset_at)
    }
}

/// Fixed-window rate limiter over a shared counter store.
///
/// Every check is one atomic increment against the store; the count it
/// returns decides admission. Any store failure denies the request.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl RateLimiter {
    /// Create a rate limiter reading the system clock.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Create a rate limiter with an explicit clock.
    pub fn with_clock(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Bound each store round-trip; exceeding it counts as a storage failure.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Record one hit against `key` and decide whether it is within `limit`
    /// for the current window of length `window`.
    ///
    /// Never returns an error: storage failures and invalid windows produce
    /// `allowed: false`.
    pub async fn check(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        env: Environment,
    ) -> RateLimitDecision {
        let now = self.clock.now();

        let Some(window) = FixedWindow::new(window) else {
            warn!(key = %key, window = ?window, "Rejecting check with an unusable window");
            return RateLimitDecision::denied(now);
        };

        let bucket = window.bucket(now);
        let storage_key = StorageKey::new(env, key, bucket);
        let window_start = window.start_of(bucket);
        let reset_at = window.end_of(bucket);

        trace!(key = %storage_key, limit, "Checking rate limit");

        let count = match self.increment(&storage_key, window_start, reset_at).await {
            Ok(count) => count,
            Err(e) => {
                error!(
                    key = %storage_key,
                    error = %e,
                    "Rate limit store unavailable, denying request"
                );
                return RateLimitDecision::denied(reset_at);
            }
        };

        let allowed = count <= limit;
        if !allowed {
            debug!(key = %storage_key, count, limit, "Rate limit exceeded");
        }

        RateLimitDecision {
            allowed,
            remaining: limit.saturating_sub(count),
            reset_at,
        }
    }

    /// Check a named policy for one identifier.
    pub async fn check_policy(
        &self,
        policy: &RateLimitPolicy,
        identifier: &str,
        env: Environment,
    ) -> RateLimitDecision {
        let key = RateLimitKey::new(&policy.name, identifier);
        self.check(&key.to_string(), policy.limit, policy.window(), env)
            .await
    }

    /// Delete every counter whose window has fully elapsed.
    ///
    /// Meant for a scheduler, not for request traffic. Returns the number of
    /// rows removed.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let now = self.clock.now();
        let removed = tokio::time::timeout(self.store_timeout, self.store.delete_expired(now))
            .await
            .map_err(|_| BulwarkError::StoreTimeout(self.store_timeout))??;

        info!(removed, "Cleaned up expired rate limit counters");
        Ok(removed)
    }

    async fn increment(
        &self,
        key: &StorageKey,
        window_start: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<u64> {
        tokio::time::timeout(
            self.store_timeout,
            self.store.increment(key, window_start, expires_at),
        )
        .await
        .map_err(|_| BulwarkError::StoreTimeout(self.store_timeout))?
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("clock", &self.clock)
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::store::MemoryCounterStore;
    use async_trait::async_trait;

    const MINUTE: Duration = Duration::from_secs(60);

    /// A store whose every call fails.
    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn increment(
            &self,
            _key: &StorageKey,
            _window_start: DateTime<Utc>,
            _expires_at: DateTime<Utc>,
        ) -> Result<u64> {
            Err(BulwarkError::Storage(sqlx::Error::PoolTimedOut))
        }

        async fn delete_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
            Err(BulwarkError::Storage(sqlx::Error::PoolClosed))
        }
    }

    /// A store that never answers.
    struct HangingStore;

    #[async_trait]
    impl CounterStore for HangingStore {
        async fn increment(
            &self,
            _key: &StorageKey,
            _window_start: DateTime<Utc>,
            _expires_at: DateTime<Utc>,
        ) -> Result<u64> {
            futures::future::pending().await
        }

        async fn delete_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
            futures::future::pending().await
        }
    }

    fn limiter_at(millis: i64) -> (RateLimiter, Arc<ManualClock>, Arc<MemoryCounterStore>) {
        let clock = Arc::new(ManualClock::at_millis(millis));
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::with_clock(store.clone(), clock.clone());
        (limiter, clock, store)
    }

    #[tokio::test]
    async fn test_quota_counts_down_then_denies() {
        let (limiter, _clock, _store) = limiter_at(1_700_000_000_000);

        for expected_remaining in [4, 3, 2, 1, 0] {
            let decision = limiter.check("login:alice", 5, MINUTE, Environment::Prod).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let decision = limiter.check("login:alice", 5, MINUTE, Environment::Prod).await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_new_window_restores_quota() {
        let (limiter, clock, _store) = limiter_at(1_700_000_000_000);

        for _ in 0..6 {
            limiter.check("login:alice", 5, MINUTE, Environment::Prod).await;
        }
        let denied = limiter.check("login:alice", 5, MINUTE, Environment::Prod).await;
        assert!(!denied.allowed);

        clock.set(denied.reset_at);

        let decision = limiter.check("login:alice", 5, MINUTE, Environment::Prod).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn test_reset_at_is_next_window_start() {
        // 30s into a minute bucket
        let (limiter, _clock, _store) = limiter_at(1_700_000_010_000);

        let decision = limiter.check("k", 1, MINUTE, Environment::Prod).await;
        assert_eq!(decision.reset_at.timestamp_millis() % 60_000, 0);
        assert_eq!(decision.reset_at.timestamp_millis(), 1_700_000_040_000);
    }

    #[tokio::test]
    async fn test_environments_have_separate_counters() {
        let (limiter, _clock, _store) = limiter_at(1_700_000_000_000);

        for _ in 0..3 {
            limiter.check("signup:1.2.3.4", 3, MINUTE, Environment::Prod).await;
        }
        let prod = limiter.check("signup:1.2.3.4", 3, MINUTE, Environment::Prod).await;
        assert!(!prod.allowed);

        let demo = limiter.check("signup:1.2.3.4", 3, MINUTE, Environment::Demo).await;
        assert!(demo.allowed);
        assert_eq!(demo.remaining, 2);
    }

    #[tokio::test]
    async fn test_different_keys_have_separate_counters() {
        let (limiter, _clock, _store) = limiter_at(1_700_000_000_000);

        limiter.check("login:alice", 1, MINUTE, Environment::Prod).await;
        let alice = limiter.check("login:alice", 1, MINUTE, Environment::Prod).await;
        let bob = limiter.check("login:bob", 1, MINUTE, Environment::Prod).await;

        assert!(!alice.allowed);
        assert!(bob.allowed);
    }

    #[tokio::test]
    async fn test_concurrent_checks_never_exceed_limit() {
        let (limiter, _clock, _store) = limiter_at(1_700_000_000_000);
        let limiter = Arc::new(limiter);
        let limit = 10;

        let tasks: Vec<_> = (0..limit * 2)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter
                        .check("upload:alice", limit, MINUTE, Environment::Prod)
                        .await
                        .allowed
                })
            })
            .collect();

        let admitted = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();

        assert_eq!(admitted as u64, limit);
    }

    #[tokio::test]
    async fn test_storage_error_fails_closed() {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let limiter = RateLimiter::with_clock(Arc::new(BrokenStore), clock);

        let decision = limiter.check("login:alice", 100, MINUTE, Environment::Prod).await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_store_timeout_fails_closed() {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let limiter = RateLimiter::with_clock(Arc::new(HangingStore), clock)
            .store_timeout(Duration::from_millis(20));

        let decision = limiter.check("login:alice", 100, MINUTE, Environment::Prod).await;
        assert!(!decision.allowed);

        let cleanup = limiter.cleanup_expired().await;
        assert!(matches!(cleanup, Err(BulwarkError::StoreTimeout(_))));
    }

    #[tokio::test]
    async fn test_zero_window_is_denied() {
        let (limiter, _clock, store) = limiter_at(1_700_000_000_000);

        let decision = limiter.check("k", 10, Duration::ZERO, Environment::Prod).await;
        assert!(!decision.allowed);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_removes_elapsed_windows() {
        let (limiter, clock, store) = limiter_at(1_700_000_000_000);

        limiter.check("a", 5, MINUTE, Environment::Prod).await;
        limiter.check("b", 5, MINUTE, Environment::Demo).await;
        assert_eq!(store.len(), 2);

        // Still inside the window
        assert_eq!(tokio_test::assert_ok!(limiter.cleanup_expired().await), 0);

        clock.advance(MINUTE);
        assert_eq!(tokio_test::assert_ok!(limiter.cleanup_expired().await), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_reports_storage_errors() {
        let clock = Arc::new(ManualClock::at_millis(0));
        let limiter = RateLimiter::with_clock(Arc::new(BrokenStore), clock);
        tokio_test::assert_err!(limiter.cleanup_expired().await);
    }

    #[tokio::test]
    async fn test_check_policy_namespaces_by_policy_name() {
        let (limiter, _clock, store) = limiter_at(0);
        let policy = RateLimitPolicy::new("admin_code", 2, MINUTE).unwrap();

        limiter.check_policy(&policy, "alice@example.com", Environment::Prod).await;

        let key = StorageKey::new(Environment::Prod, "admin_code:alice@example.com", 0);
        assert_eq!(store.get(&key).unwrap().count, 1);
    }

    #[test]
    fn test_decision_serializes_reset_at_as_epoch_ms() {
        let decision = RateLimitDecision {
            allowed: true,
            remaining: 3,
            reset_at: crate::clock::millis_to_datetime(60_000),
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["resetAt"], 60_000);
        assert_eq!(json["remaining"], 3);
    }
}
