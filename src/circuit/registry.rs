//! Get-or-create registry of circuit breakers, one per dependency.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use super::breaker::{CircuitBreaker, CircuitBreakerOptions, CircuitStatus};
use crate::clock::{Clock, SystemClock};

/// Process-wide set of breakers keyed by dependency name.
///
/// Construct one per process and share it with request handlers; failures
/// recorded against one name never affect another.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: CircuitBreakerOptions,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry reading the system clock.
    pub fn new(defaults: CircuitBreakerOptions) -> Self {
        Self::with_clock(defaults, Arc::new(SystemClock))
    }

    /// Create an empty registry with an explicit clock.
    pub fn with_clock(defaults: CircuitBreakerOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
            clock,
        }
    }

    /// Get the breaker for `name`, creating it with `options` on first use.
    ///
    /// Options only apply at creation; later calls get the existing breaker.
    pub fn get(&self, name: &str, options: CircuitBreakerOptions) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(circuit = %name, options = ?options, "Creating circuit breaker");
                Arc::new(CircuitBreaker::with_clock(name, options, self.clock.clone()))
            })
            .clone()
    }

    /// Get the breaker for `name`, creating it with the registry defaults.
    pub fn get_or_default(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get(name, self.defaults.clone())
    }

    /// Status of every breaker, ordered by name.
    pub fn all_status(&self) -> Vec<CircuitStatus> {
        let mut statuses: Vec<CircuitStatus> =
            self.breakers.iter().map(|entry| entry.value().status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Force every breaker closed.
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
        info!(count = self.breakers.len(), "Reset all circuit breakers");
    }

    /// Number of breakers created so far.
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker has been created yet.
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.breakers.len())
            .field("defaults", &self.defaults)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitState;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn registry() -> CircuitBreakerRegistry {
        let clock = Arc::new(ManualClock::at_millis(0));
        CircuitBreakerRegistry::with_clock(
            CircuitBreakerOptions::new(2, Duration::from_secs(30), 1),
            clock,
        )
    }

    #[test]
    fn test_get_returns_same_instance() {
        let registry = registry();
        let a = registry.get_or_default("github");
        let b = registry.get("github", CircuitBreakerOptions::new(99, Duration::from_secs(1), 9));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.options().failure_threshold, 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_breakers_are_isolated() {
        let registry = registry();
        let github = registry.get_or_default("github");
        let stripe = registry.get_or_default("stripe");

        github.record_failure();
        github.record_failure();

        assert_eq!(github.state(), CircuitState::Open);
        assert_eq!(stripe.state(), CircuitState::Closed);
    }

    #[test]
    fn test_all_status_lists_every_breaker() {
        let registry = registry();
        registry.get_or_default("stripe").record_failure();
        registry.get_or_default("github");

        let statuses = registry.all_status();
        let names: Vec<&str> = statuses.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["github", "stripe"]);
        assert_eq!(statuses[1].failure_count, 1);
    }

    #[test]
    fn test_reset_all() {
        let registry = registry();
        for name in ["a", "b"] {
            let cb = registry.get_or_default(name);
            cb.record_failure();
            cb.record_failure();
        }

        registry.reset_all();

        assert!(registry
            .all_status()
            .iter()
            .all(|s| s.state == CircuitState::Closed && s.failure_count == 0));
    }

    #[test]
    fn test_concurrent_get_creates_one_breaker() {
        let registry = Arc::new(registry());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get_or_default("shared"))
            })
            .collect();

        let breakers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(breakers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }
}
