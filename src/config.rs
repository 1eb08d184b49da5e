//! Configuration management for ratewarden.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then environment variables prefixed with `RATEWARDEN` using `__` between
//! nested keys (e.g. `RATEWARDEN__TOKEN_BUCKET__CAPACITY=20`).

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, WardenError};
use crate::ratelimit::{KeyRule, RuleSet};

/// Environment variable prefix for configuration overrides.
const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration for ratewarden.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Sliding window configuration
    #[serde(default)]
    pub sliding_window: SlidingWindowSettings,

    /// Token bucket configuration
    #[serde(default)]
    pub token_bucket: TokenBucketSettings,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level filter, used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of human-readable output
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

/// Sliding window configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlidingWindowSettings {
    /// Inline per-key rules
    #[serde(default)]
    pub rules: Vec<KeyRule>,

    /// Path to an additional rule file
    #[serde(default)]
    pub rules_path: Option<String>,
}

impl SlidingWindowSettings {
    /// Collect the inline rules followed by the rules from `rules_path`, if set.
    ///
    /// Rules from the file come last, so they override inline rules for the same key.
    pub fn rule_set(&self) -> Result<RuleSet> {
        let mut rules = self.rules.clone();
        if let Some(ref path) = self.rules_path {
            rules.extend(RuleSet::from_file(path)?.rules);
        }
        Ok(RuleSet { rules })
    }
}

/// Token bucket configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketSettings {
    /// Bucket capacity
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Refill interval in milliseconds
    #[serde(default = "default_refill_interval_ms")]
    pub refill_interval_ms: u64,
}

impl Default for TokenBucketSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_interval_ms: default_refill_interval_ms(),
        }
    }
}

impl TokenBucketSettings {
    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }
}

fn default_capacity() -> u32 {
    5
}

fn default_refill_interval_ms() -> u64 {
    1000
}

impl WardenConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|config| config.try_deserialize::<WardenConfig>())
            .map_err(|e| WardenError::Config(e.to_string()))
    }

    /// Load configuration from a YAML file path, without environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WardenConfig = serde_yaml::from_str(&contents)
            .map_err(|e| WardenError::Config(e.to_string()))?;
        Ok(config)
    }
}
