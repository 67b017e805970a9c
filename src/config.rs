//! Configuration management for Tollgate.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TollgateError};
use crate::ratelimit::{AdmissionPolicy, Verdict};

/// Prefix for environment overrides, e.g. `TOLLGATE__STORE__URL`.
const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for Tollgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// How consumers should treat non-definitive results
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Which store implementation holds the bucket records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store. Only useful for tests and single-process setups.
    Memory,
    /// Redis, shared by every instance.
    #[default]
    Redis,
}

/// Shared store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL for the Redis backend
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Namespace prepended to every client id
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Upper bound for a single store round trip, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            key_prefix: default_key_prefix(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// The store call timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    crate::ratelimit::DEFAULT_KEY_PREFIX.to_string()
}

fn default_timeout_ms() -> u64 {
    crate::ratelimit::DEFAULT_TIMEOUT_MS
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

/// Admission policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Verdict when the store could not be consulted
    #[serde(default = "default_on_error")]
    pub on_error: Verdict,

    /// Verdict when no bucket is configured for the client
    #[serde(default = "default_on_not_found")]
    pub on_not_found: Verdict,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            on_error: default_on_error(),
            on_not_found: default_on_not_found(),
        }
    }
}

fn default_on_error() -> Verdict {
    Verdict::Deny
}

fn default_on_not_found() -> Verdict {
    Verdict::Allow
}

impl From<&PolicyConfig> for AdmissionPolicy {
    fn from(cfg: &PolicyConfig) -> Self {
        AdmissionPolicy {
            on_error: cfg.on_error,
            on_not_found: cfg.on_not_found,
        }
    }
}

impl TollgateConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `TOLLGATE__`-prefixed environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }

        let config: TollgateConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path, without environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would leave the limiter unusable.
    pub fn validate(&self) -> Result<()> {
        if self.store.key_prefix.is_empty() {
            return Err(TollgateError::Config("store.key_prefix must not be empty".to_string()));
        }

        if self.store.timeout_ms == 0 {
            return Err(TollgateError::Config("store.timeout_ms must be positive".to_string()));
        }

        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            other => {
                return Err(TollgateError::Config(format!("unknown log level: {}", other)));
            }
        }

        Ok(())
    }
}
