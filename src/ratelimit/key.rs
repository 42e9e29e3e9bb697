//! Counter key composition.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BulwarkError;

/// Deployment environment a counter belongs to.
///
/// Counters are namespaced by environment so traffic against the demo
/// deployment can never consume production quota, or the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production traffic
    #[default]
    Prod,
    /// Public demo deployment
    Demo,
}

impl Environment {
    /// The short tag embedded in storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Demo => "demo",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = BulwarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Ok(Environment::Prod),
            "demo" => Ok(Environment::Demo),
            other => Err(BulwarkError::InvalidArgument(format!(
                "unknown environment '{}'",
                other
            ))),
        }
    }
}

/// A logical rate-limit key: what is being limited, and for whom.
///
/// Rendered as `namespace:identifier`, e.g. `admin_code:alice@example.com`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The action being limited
    pub namespace: String,
    /// Who is performing it (user id, email, IP address)
    pub identifier: String,
}

impl RateLimitKey {
    /// Create a new key.
    pub fn new(namespace: &str, identifier: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            identifier: identifier.to_string(),
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.identifier)
    }
}

/// The key a counter is stored under.
///
/// Format: `{env}:{key}:{bucket}`. Embedding the bucket means every window
/// gets its own row, so a counter never has to be reset in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    /// Environment the counter belongs to
    pub env: Environment,
    /// Caller-supplied logical key
    pub key: String,
    /// Fixed-window bucket index
    pub bucket: i64,
}

impl StorageKey {
    /// Create a new storage key.
    pub fn new(env: Environment, key: &str, bucket: i64) -> Self {
        Self {
            env,
            key: key.to_string(),
            bucket,
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.env, self.key, self.bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_format() {
        let logical = RateLimitKey::new("login", "alice@example.com");
        let key = StorageKey::new(Environment::Prod, &logical.to_string(), 28_000_000);
        assert_eq!(key.to_string(), "prod:login:alice@example.com:28000000");
    }

    #[test]
    fn test_environments_never_share_a_key() {
        let prod = StorageKey::new(Environment::Prod, "login:alice", 7);
        let demo = StorageKey::new(Environment::Demo, "login:alice", 7);
        assert_ne!(prod.to_string(), demo.to_string());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!(" DEMO ".parse::<Environment>().unwrap(), Environment::Demo);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_environment_serde() {
        let env: Environment = serde_yaml::from_str("demo").unwrap();
        assert_eq!(env, Environment::Demo);
        assert_eq!(serde_json::to_string(&Environment::Prod).unwrap(), "\"prod\"");
    }
}
