//! Circuit breakers for unreliable external dependencies.

mod breaker;
mod error;
mod registry;

pub use breaker::{CircuitBreaker, CircuitBreakerOptions, CircuitState, CircuitStatus};
pub use error::{CircuitError, CircuitOpenError};
pub use registry::CircuitBreakerRegistry;
