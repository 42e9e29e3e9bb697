//! Configuration management for Bulwark.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::admin::AdminVerificationConfig;
use crate::circuit::CircuitBreakerOptions;
use crate::error::{BulwarkError, Result};
use crate::ratelimit::{Environment, RateLimitPolicies, RateLimitPolicy};

/// Prefix for environment variable overrides, e.g.
/// `BULWARK__RATE_LIMITING__DATABASE_URL`.
pub const ENV_PREFIX: &str = "BULWARK";

/// Main configuration for Bulwark.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulwarkConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Defaults for circuit breakers created without explicit options
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerOptions,

    /// Admin verification configuration
    #[serde(default)]
    pub admin: AdminVerificationConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Counter store connection string
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Maximum pooled store connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Upper bound on one store round-trip in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Seconds between scheduled cleanup passes
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Environment this deployment counts against
    #[serde(default)]
    pub environment: Environment,

    /// Named per-call-site policies
    #[serde(default)]
    pub policies: Vec<RateLimitPolicy>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            store_timeout_ms: default_store_timeout_ms(),
            cleanup_interval_secs: default_cleanup_interval(),
            environment: Environment::default(),
            policies: Vec::new(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://bulwark.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_store_timeout_ms() -> u64 {
    2000
}

fn default_cleanup_interval() -> u64 {
    300
}

impl RateLimitingConfig {
    /// Store round-trip timeout.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Interval between cleanup passes.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// The configured policies, validated and indexed by name.
    pub fn policies(&self) -> Result<RateLimitPolicies> {
        RateLimitPolicies::from_list(&self.policies)
    }
}

impl BulwarkConfig {
    /// Load configuration from an optional YAML file, with `BULWARK__*`
    /// environment variables layered on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: BulwarkConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: BulwarkConfig = serde_yaml::from_str(yaml)
            .map_err(|e| BulwarkError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section for unusable values.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.database_url.trim().is_empty() {
            return Err(BulwarkError::Config("rate_limiting.database_url is empty".into()));
        }
        if self.rate_limiting.store_timeout_ms == 0 {
            return Err(BulwarkError::Config(
                "rate_limiting.store_timeout_ms must be positive".into(),
            ));
        }
        if self.rate_limiting.cleanup_interval_secs == 0 {
            return Err(BulwarkError::Config(
                "rate_limiting.cleanup_interval_secs must be positive".into(),
            ));
        }
        self.rate_limiting.policies()?;
        self.circuit_breaker.validate()?;
        self.admin.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BulwarkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.rate_limiting.store_timeout(), Duration::from_secs(2));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.admin.code_ttl(), Duration::from_secs(300));
        assert_eq!(config.admin.session_ttl(), Duration::from_secs(1800));
        assert_eq!(config.admin.max_attempts, 5);
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
logging:
  level: debug
  json: true
rate_limiting:
  environment: demo
  cleanup_interval_secs: 60
  policies:
    - name: admin_code
      limit: 5
      window_ms: 3600000
circuit_breaker:
  failure_threshold: 3
  reset_timeout_ms: 1000
admin:
  secure_cookie: false
"#;
        let config = BulwarkConfig::from_yaml(yaml).unwrap();

        assert!(config.logging.json);
        assert_eq!(config.rate_limiting.environment, Environment::Demo);
        assert_eq!(config.rate_limiting.cleanup_interval(), Duration::from_secs(60));
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.half_open_success_threshold, 2);
        assert!(!config.admin.secure_cookie);

        let policies = config.rate_limiting.policies().unwrap();
        assert_eq!(policies.require("admin_code").unwrap().limit, 5);
    }

    #[test]
    fn test_invalid_yaml_values_rejected() {
        let yaml = r#"
rate_limiting:
  policies:
    - name: login
      limit: 0
      window_ms: 1000
"#;
        assert!(matches!(BulwarkConfig::from_yaml(yaml), Err(BulwarkError::Config(_))));

        let yaml = r#"
circuit_breaker:
  failure_threshold: 0
"#;
        assert!(BulwarkConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "rate_limiting:\n  database_url: \"sqlite::memory:\"\n  max_connections: 1\nadmin:\n  session_ttl_secs: 600"
        )
        .unwrap();

        let config = BulwarkConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.rate_limiting.database_url, "sqlite::memory:");
        assert_eq!(config.rate_limiting.max_connections, 1);
        assert_eq!(config.admin.session_ttl(), Duration::from_secs(600));
        assert_eq!(config.admin.code_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = BulwarkConfig::load(Some(Path::new("/nonexistent/bulwark.yaml")));
        assert!(matches!(result, Err(BulwarkError::Config(_))));
    }
}
