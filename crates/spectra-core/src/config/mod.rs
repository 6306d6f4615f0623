use crate::executor::RetryPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// When a new subscriber should refetch data that is already cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefetchOnMount {
    /// Serve cached data; only missing, invalidated or rejected entries fetch.
    #[default]
    Never,
    /// Every new subscription refetches.
    Always,
    /// Refetch when the data was fulfilled more than this many milliseconds ago.
    #[serde(rename = "older_than_ms")]
    OlderThan(u64),
}

/// When a mutation invalidates the tags it declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationTiming {
    /// After the mutation resolves, and only when it succeeds.
    #[default]
    Delayed,
    /// As soon as the mutation is triggered.
    Immediate,
}

/// Logging configuration used by binaries hosting the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset. Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

/// Cache-wide policy. Endpoints may override retention, retry, timeout and refetch policy.
///
/// Loaded with the `SPECTRA` prefix for environment overrides using `__` as a separator.
///
/// # Example
///
/// ```toml
/// keep_unused_data_for_ms = 30000
/// refetch_on_mount_or_arg_change = { older_than_ms = 5000 }
///
/// [retry]
/// max_retries = 5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Retention after the last unsubscribe (default: 60000)
    #[serde(default = "default_keep_unused_data_for_ms")]
    pub keep_unused_data_for_ms: u64,

    /// Lifetime of the interest registered by `prefetch` (default: 10000)
    #[serde(default = "default_keep_prefetch_subscriptions_for_ms")]
    pub keep_prefetch_subscriptions_for_ms: u64,

    /// Retention of settled mutation records (default: 10000)
    #[serde(default = "default_keep_mutation_results_for_ms")]
    pub keep_mutation_results_for_ms: u64,

    #[serde(default)]
    pub refetch_on_mount_or_arg_change: RefetchOnMount,

    #[serde(default)]
    pub invalidation_timing: InvalidationTiming,

    /// Keep the last successful data when a refetch is rejected (default: true)
    #[serde(default = "default_keep_data_on_error")]
    pub keep_data_on_error: bool,

    /// Timeout raced against every request; 0 disables it (default: 30000)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_keep_unused_data_for_ms() -> u64 {
    60_000
}

fn default_keep_prefetch_subscriptions_for_ms() -> u64 {
    10_000
}

fn default_keep_mutation_results_for_ms() -> u64 {
    10_000
}

fn default_keep_data_on_error() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            keep_unused_data_for_ms: default_keep_unused_data_for_ms(),
            keep_prefetch_subscriptions_for_ms: default_keep_prefetch_subscriptions_for_ms(),
            keep_mutation_results_for_ms: default_keep_mutation_results_for_ms(),
            refetch_on_mount_or_arg_change: RefetchOnMount::default(),
            invalidation_timing: InvalidationTiming::default(),
            keep_data_on_error: default_keep_data_on_error(),
            request_timeout_ms: default_request_timeout_ms(),
            retry: RetryPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// Environment variables with the `SPECTRA__` prefix override any value, using `__` for
    /// nesting (e.g. `SPECTRA__RETRY__MAX_RETRIES=5`). A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("keep_unused_data_for_ms", default_keep_unused_data_for_ms())?
            .set_default("request_timeout_ms", default_request_timeout_ms())?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("SPECTRA").prefix_separator("__").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/spectra.toml`, overridable with `SPECTRA_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("SPECTRA_CONFIG").unwrap_or_else(|_| "config/spectra.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        self.retry.validate()?;

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(format!(
                "Invalid logging format '{}': expected 'json' or 'pretty'",
                self.logging.format
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err("Logging level must not be empty".to_string());
        }

        Ok(())
    }

    #[must_use]
    pub fn keep_unused_data_for(&self) -> Duration {
        Duration::from_millis(self.keep_unused_data_for_ms)
    }

    #[must_use]
    pub fn keep_prefetch_subscriptions_for(&self) -> Duration {
        Duration::from_millis(self.keep_prefetch_subscriptions_for_ms)
    }

    #[must_use]
    pub fn keep_mutation_results_for(&self) -> Duration {
        Duration::from_millis(self.keep_mutation_results_for_ms)
    }

    /// Returns `None` when the timeout is disabled.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}
