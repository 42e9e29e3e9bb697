//! Named rate limit policies.
//!
//! A policy is the typed configuration for one call site, e.g. "admin code
//! requests: 5 per hour". Policies are loaded from the `rate_limiting`
//! section of the configuration and validated up front so a bad limit is a
//! startup error rather than a silently permissive check.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BulwarkError, Result};

/// Quota for one kind of action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Policy name, used as the counter namespace
    pub name: String,
    /// Maximum hits per window
    pub limit: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl RateLimitPolicy {
    /// Create and validate a policy.
    pub fn new(name: &str, limit: u64, window: Duration) -> Result<Self> {
        let policy = Self {
            name: name.to_string(),
            limit,
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Reject policies that could never admit anything or would corrupt keys.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BulwarkError::Config("policy name must not be empty".into()));
        }
        if self.name.contains(':') {
            return Err(BulwarkError::Config(format!(
                "policy name '{}' must not contain ':'",
                self.name
            )));
        }
        if self.limit == 0 {
            return Err(BulwarkError::Config(format!(
                "policy '{}' must allow at least one request",
                self.name
            )));
        }
        if self.window_ms == 0 || i64::try_from(self.window_ms).is_err() {
            return Err(BulwarkError::Config(format!(
                "policy '{}' has an unusable window of {}ms",
                self.name, self.window_ms
            )));
        }
        Ok(())
    }
}

/// A validated set of policies indexed by name.
#[derive(Debug, Clone, Default)]
pub struct RateLimitPolicies {
    policies: HashMap<String, RateLimitPolicy>,
}

impl RateLimitPolicies {
    /// Build from a list, rejecting invalid entries and duplicate names.
    pub fn from_list(list: &[RateLimitPolicy]) -> Result<Self> {
        let mut policies = HashMap::with_capacity(list.len());

        for policy in list {
            policy.validate()?;
            if policies.insert(policy.name.clone(), policy.clone()).is_some() {
                return Err(BulwarkError::Config(format!(
                    "duplicate rate limit policy '{}'",
                    policy.name
                )));
            }
        }

        info!(count = policies.len(), "Loaded rate limit policies");
        Ok(Self { policies })
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<&RateLimitPolicy> {
        self.policies.get(name)
    }

    /// Look up a policy that the caller requires to exist.
    pub fn require(&self, name: &str) -> Result<&RateLimitPolicy> {
        self.get(name)
            .ok_or_else(|| BulwarkError::Config(format!("no rate limit policy named '{}'", name)))
    }

    /// Number of policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether there are no policies.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
