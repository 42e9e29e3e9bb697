//! Circuit breaker for a single external dependency.
//!
//! ```text
//! ┌────────┐  N failures   ┌──────┐  reset_timeout  ┌───────────┐
//! │ Closed ├──────────────►│ Open ├────────────────►│ Half-Open │
//! └────┬───┘               └──────┘                 └─────┬─────┘
//!      │                       ▲         failure          │
//!      │                       └──────────────────────────┤
//!      │◄─────────────────────────────────────────────────┘
//!               M successes in half-open
//! ```
//!
//! State is process-local. Each process judges a dependency's health on its
//! own; nothing is shared across instances.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{CircuitError, CircuitOpenError};
use crate::clock::{add_duration, remaining_until, Clock, SystemClock};
use crate::error::{BulwarkError, Result};

/// Tuning for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerOptions {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Milliseconds an open circuit waits before letting a probe through
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Successes in half-open needed to close the circuit
    #[serde(default = "default_half_open_success_threshold")]
    pub half_open_success_threshold: u32,

    /// Admit a single probe at a time while half-open
    #[serde(default)]
    pub exclusive_half_open_probe: bool,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            half_open_success_threshold: default_half_open_success_threshold(),
            exclusive_half_open_probe: false,
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

fn default_half_open_success_threshold() -> u32 {
    2
}

impl CircuitBreakerOptions {
    /// Options with the three thresholds set explicitly.
    pub fn new(failure_threshold: u32, reset_timeout: Duration, half_open_success_threshold: u32) -> Self {
        Self {
            failure_threshold,
            reset_timeout_ms: u64::try_from(reset_timeout.as_millis()).unwrap_or(u64::MAX),
            half_open_success_threshold,
            exclusive_half_open_probe: false,
        }
    }

    /// Only let one probe through at a time while half-open.
    pub fn exclusive_probe(mut self, exclusive: bool) -> Self {
        self.exclusive_half_open_probe = exclusive;
        self
    }

    /// Duration an open circuit waits before probing.
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Reject thresholds that would make the breaker meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(BulwarkError::Config("failure_threshold must be at least 1".into()));
        }
        if self.half_open_success_threshold == 0 {
            return Err(BulwarkError::Config(
                "half_open_success_threshold must be at least 1".into(),
            ));
        }
        if self.reset_timeout_ms == 0 {
            return Err(BulwarkError::Config("reset_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow through.
    Closed,
    /// Calls are rejected without touching the dependency.
    Open,
    /// Probing whether the dependency has recovered.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStatus {
    /// Name of the protected dependency
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures while closed
    pub failure_count: u32,
    /// Successes while half-open
    pub success_count: u32,
    /// When the most recent failure was recorded
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_failure_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    /// When the in-flight exclusive probe was admitted.
    probe_started: Option<DateTime<Utc>>,
}

impl CircuitInner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            probe_started: None,
        }
    }
}

/// A circuit breaker protecting one named dependency.
pub struct CircuitBreaker {
    name: String,
    options: CircuitBreakerOptions,
    clock: Arc<dyn Clock>,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    /// Create a breaker reading the system clock.
    pub fn new(name: &str, options: CircuitBreakerOptions) -> Self {
        Self::with_clock(name, options, Arc::new(SystemClock))
    }

    /// Create a breaker with an explicit clock.
    ///
    /// Zero thresholds are raised to one.
    pub fn with_clock(name: &str, mut options: CircuitBreakerOptions, clock: Arc<dyn Clock>) -> Self {
        options.failure_threshold = options.failure_threshold.max(1);
        options.half_open_success_threshold = options.half_open_success_threshold.max(1);

        Self {
            name: name.to_string(),
            options,
            clock,
            inner: Mutex::new(CircuitInner::closed()),
        }
    }

    /// Name of the protected dependency.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The breaker's options.
    pub fn options(&self) -> &CircuitBreakerOptions {
        &self.options
    }

    /// Run `f` through the breaker.
    ///
    /// When the circuit is open, `f` is not invoked and
    /// [`CircuitError::Open`] is returned. Otherwise the outcome of `f` is
    /// recorded and its error, if any, is returned as
    /// [`CircuitError::Inner`].
    pub async fn call<F, Fut, T, E>(&self, f: F) -> std::result::Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.try_acquire()?;

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    /// Ask whether a call may proceed right now.
    ///
    /// An open circuit whose reset timeout has elapsed moves to half-open
    /// and admits the call as a probe. Callers that get `Ok` must report the
    /// outcome with [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn try_acquire(&self) -> std::result::Result<(), CircuitOpenError> {
        let now = self.clock.now();
        let reset_timeout = self.options.reset_timeout();
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let reopen_at = inner
                .last_failure_time
                .map(|t| add_duration(t, reset_timeout))
                .unwrap_or(now);

            if now < reopen_at {
                return Err(self.open_error(remaining_until(now, reopen_at)));
            }

            self.transition(&mut inner, CircuitState::HalfOpen);
            inner.success_count = 0;
            inner.probe_started = None;
        }

        if inner.state == CircuitState::HalfOpen && self.options.exclusive_half_open_probe {
            // A probe that never reported back is abandoned after one reset timeout.
            if let Some(started) = inner.probe_started {
                let stale_at = add_duration(started, reset_timeout);
                if now < stale_at {
                    debug!(circuit = %self.name, "Probe already in flight, rejecting call");
                    return Err(self.open_error(remaining_until(now, stale_at)));
                }
            }
            inner.probe_started = Some(now);
        }

        Ok(())
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.probe_started = None;

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.options.half_open_success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            CircuitState::Open => {
                // Calls are rejected while open; only manual reporting lands here.
                inner.failure_count = 0;
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.probe_started = None;
        inner.last_failure_time = Some(now);

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.options.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                    inner.success_count = 0;
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open);
                inner.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Snapshot for dashboards.
    pub fn status(&self) -> CircuitStatus {
        let inner = self.inner.lock();
        CircuitStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_time,
        }
    }

    /// Force the breaker closed with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
        *inner = CircuitInner::closed();
    }

    fn transition(&self, inner: &mut CircuitInner, to: CircuitState) {
        warn!(
            circuit = %self.name,
            from = %inner.state,
            to = %to,
            failure_count = inner.failure_count,
            success_count = inner.success_count,
            "Circuit breaker state transition"
        );
        inner.state = to;
    }

    fn open_error(&self, retry_after: Duration) -> CircuitOpenError {
        CircuitOpenError {
            name: self.name.clone(),
            retry_after,
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}
