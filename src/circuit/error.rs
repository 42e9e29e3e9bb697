//! Errors surfaced by circuit-protected calls.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// The call was not attempted because the circuit is open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit '{name}' is open; retry after {}ms", .retry_after.as_millis())]
pub struct CircuitOpenError {
    /// Name of the protected dependency
    pub name: String,
    /// How long until the breaker will let a probe through
    pub retry_after: Duration,
}

impl CircuitOpenError {
    /// Machine-readable error code.
    pub const CODE: &'static str = "CIRCUIT_OPEN";

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        Self::CODE
    }
}

/// Result of a call made through a circuit breaker.
///
/// `Open` means the dependency was never invoked. `Inner` carries the
/// dependency's own error unchanged, after it has been recorded.
#[derive(Debug)]
pub enum CircuitError<E> {
    /// Rejected without calling the dependency
    Open(CircuitOpenError),
    /// The dependency itself failed
    Inner(E),
}

impl<E> CircuitError<E> {
    /// Whether the call was short-circuited.
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open(_))
    }

    /// The `CIRCUIT_OPEN` code if the call was short-circuited.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            CircuitError::Open(open) => Some(open.code()),
            CircuitError::Inner(_) => None,
        }
    }

    /// Time to wait before retrying, if the call was short-circuited.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CircuitError::Open(open) => Some(open.retry_after),
            CircuitError::Inner(_) => None,
        }
    }

    /// The dependency's error, if it was invoked and failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Open(_) => None,
            CircuitError::Inner(e) => Some(e),
        }
    }
}

impl<E: fmt::Display> fmt::Display for CircuitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitError::Open(open) => fmt::Display::fmt(open, f),
            CircuitError::Inner(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl<E> std::error::Error for CircuitError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CircuitError::Open(open) => Some(open),
            CircuitError::Inner(e) => Some(e),
        }
    }
}

impl<E> From<CircuitOpenError> for CircuitError<E> {
    fn from(open: CircuitOpenError) -> Self {
        CircuitError::Open(open)
    }
}
