//! Controller configuration.
//!
//! Every field has a serde default, so an empty document is a valid
//! configuration. Environment variables prefixed with `PROMOFLOW_` override
//! individual fields.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::controller::retry::RetryConfig;
use crate::core::DEFAULT_FREIGHT_HISTORY_LIMIT;
use crate::errors::ConfigError;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `promoflow=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_freight_history_limit() -> usize {
    DEFAULT_FREIGHT_HISTORY_LIMIT
}

fn default_fallback_poll_interval_secs() -> u64 {
    300
}

fn default_verification_poll_interval_secs() -> u64 {
    10
}

fn default_analysis_enabled() -> bool {
    true
}

fn default_status_patch_retry() -> RetryConfig {
    RetryConfig::conflict()
}

fn default_requeue_backoff() -> RetryConfig {
    RetryConfig::requeue()
}

/// Configuration of the Stage controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Number of concurrent reconciliation workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Number of FreightCollections remembered per Stage.
    #[serde(default = "default_freight_history_limit")]
    pub freight_history_limit: usize,
    /// Requeue interval when nothing is in flight, in seconds.
    #[serde(default = "default_fallback_poll_interval_secs")]
    pub fallback_poll_interval_secs: u64,
    /// Requeue interval while a verification runs, in seconds.
    #[serde(default = "default_verification_poll_interval_secs")]
    pub verification_poll_interval_secs: u64,
    /// Whether the analysis engine integration is available.
    #[serde(default = "default_analysis_enabled")]
    pub analysis_enabled: bool,
    /// Per-Stage backoff after failed reconciliations.
    #[serde(default = "default_requeue_backoff")]
    pub requeue_backoff: RetryConfig,
    /// In-place retry of conflicting Freight writes.
    #[serde(default = "default_status_patch_retry")]
    pub status_patch_retry: RetryConfig,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            freight_history_limit: default_freight_history_limit(),
            fallback_poll_interval_secs: default_fallback_poll_interval_secs(),
            verification_poll_interval_secs: default_verification_poll_interval_secs(),
            analysis_enabled: default_analysis_enabled(),
            requeue_backoff: default_requeue_backoff(),
            status_patch_retry: default_status_patch_retry(),
            logging: LoggingConfig::default(),
        }
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(name, format!("{value:?}: {e}")))
}

impl ControllerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Applies `PROMOFLOW_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary variable source.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        const WORKERS: &str = "PROMOFLOW_WORKERS";
        const ANALYSIS: &str = "PROMOFLOW_ANALYSIS_ENABLED";
        const FALLBACK: &str = "PROMOFLOW_FALLBACK_POLL_INTERVAL_SECS";
        const VERIFICATION: &str = "PROMOFLOW_VERIFICATION_POLL_INTERVAL_SECS";
        const HISTORY: &str = "PROMOFLOW_FREIGHT_HISTORY_LIMIT";
        const LOG_LEVEL: &str = "PROMOFLOW_LOG_LEVEL";
        const LOG_JSON: &str = "PROMOFLOW_LOG_JSON";

        if let Some(v) = lookup(WORKERS) {
            self.workers = parse_env(WORKERS, &v)?;
        }
        if let Some(v) = lookup(ANALYSIS) {
            self.analysis_enabled = parse_env(ANALYSIS, &v)?;
        }
        if let Some(v) = lookup(FALLBACK) {
            self.fallback_poll_interval_secs = parse_env(FALLBACK, &v)?;
        }
        if let Some(v) = lookup(VERIFICATION) {
            self.verification_poll_interval_secs = parse_env(VERIFICATION, &v)?;
        }
        if let Some(v) = lookup(HISTORY) {
            self.freight_history_limit = parse_env(HISTORY, &v)?;
        }
        if let Some(v) = lookup(LOG_LEVEL) {
            self.logging.level = v;
        }
        if let Some(v) = lookup(LOG_JSON) {
            self.logging.json = parse_env(LOG_JSON, &v)?;
        }
        Ok(self)
    }

    /// Rejects values the controller cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        if self.freight_history_limit == 0 {
            return Err(ConfigError::invalid("freight_history_limit", "must be at least 1"));
        }
        if self.fallback_poll_interval_secs == 0 {
            return Err(ConfigError::invalid("fallback_poll_interval_secs", "must be at least 1"));
        }
        if self.verification_poll_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "verification_poll_interval_secs",
                "must be at least 1",
            ));
        }
        if self.requeue_backoff.max_attempts == 0 || self.status_patch_retry.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        Ok(())
    }

    /// Requeue interval when nothing is in flight.
    #[must_use]
    pub fn fallback_poll_interval(&self) -> Duration {
        Duration::from_secs(self.fallback_poll_interval_secs)
    }

    /// Requeue interval while a verification runs.
    #[must_use]
    pub fn verification_poll_interval(&self) -> Duration {
        Duration::from_secs(self.verification_poll_interval_secs)
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Enables or disables the analysis engine integration.
    #[must_use]
    pub fn with_analysis_enabled(mut self, enabled: bool) -> Self {
        self.analysis_enabled = enabled;
        self
    }

    /// Sets the FreightHistory bound.
    #[must_use]
    pub fn with_freight_history_limit(mut self, limit: usize) -> Self {
        self.freight_history_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ControllerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.workers, 4);
        assert_eq!(config.freight_history_limit, 10);
        assert_eq!(config.fallback_poll_interval(), Duration::from_secs(300));
        assert!(config.analysis_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"workers": 2, "analysis_enabled": false, "logging": {{"json": true}}}}"#
        )
        .unwrap();

        let config = ControllerConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.workers, 2);
        assert!(!config.analysis_enabled);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ControllerConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PROMOFLOW_WORKERS", "8"),
            ("PROMOFLOW_ANALYSIS_ENABLED", "false"),
            ("PROMOFLOW_FREIGHT_HISTORY_LIMIT", "3"),
            ("PROMOFLOW_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let config = ControllerConfig::default()
            .with_overrides_from(|name| vars.get(name).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.workers, 8);
        assert!(!config.analysis_enabled);
        assert_eq!(config.freight_history_limit, 3);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.verification_poll_interval_secs, 10);
    }

    #[test]
    fn test_bad_override_names_the_variable() {
        let err = ControllerConfig::default()
            .with_overrides_from(|name| (name == "PROMOFLOW_WORKERS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("PROMOFLOW_WORKERS"));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(ControllerConfig::default().with_workers(0).validate().is_err());
        assert!(ControllerConfig::default().with_freight_history_limit(0).validate().is_err());
    }
}
