//! Bulwark - resilience and abuse prevention for web services
//!
//! Three independent services, each constructed once per process and shared
//! with request handlers:
//!
//! - [`ratelimit::RateLimiter`]: fixed-window quotas over a shared counter
//!   store, denying traffic whenever the store cannot answer.
//! - [`circuit::CircuitBreakerRegistry`]: per-dependency circuit breakers that
//!   stop calling a failing dependency and periodically probe it.
//! - [`admin::AdminVerificationStore`]: one-time codes and short-lived
//!   sessions for a separate admin sign-in path.

pub mod admin;
pub mod circuit;
pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod telemetry;
