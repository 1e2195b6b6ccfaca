//! Collector, export and logging configuration for flowlens.
//!
//! Values come from environment-style keys (`COLLECTOR_API_KEY`,
//! `COLLECTOR_ENDPOINT`, `LOG_LEVEL`, `MAX_RETRIES`, `TIMEOUT_MS`, ...) or from
//! a JSON file using the field names of [`TracingConfig`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Error
// ─────────────────────────────────────────────────────────────────────────────

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Keys and defaults
// ─────────────────────────────────────────────────────────────────────────────

pub const API_KEY_VAR: &str = "COLLECTOR_API_KEY";
pub const ENDPOINT_VAR: &str = "COLLECTOR_ENDPOINT";
pub const PATH_VAR: &str = "COLLECTOR_PATH";
pub const LOG_LEVEL_VAR: &str = "LOG_LEVEL";
pub const MAX_RETRIES_VAR: &str = "MAX_RETRIES";
pub const TIMEOUT_VAR: &str = "TIMEOUT_MS";
pub const USER_ID_VAR: &str = "COLLECTOR_USER_ID";
pub const LABEL_VAR: &str = "COLLECTOR_LABEL";
pub const SHUTDOWN_TIMEOUT_VAR: &str = "SHUTDOWN_TIMEOUT_MS";

pub const DEFAULT_ENDPOINT: &str = "https://app.langwatch.ai";
/// Ingestion path of the JSON collector.
pub const COLLECTOR_PATH: &str = "/api/collector";
/// Ingestion path of the OTLP-style collector.
pub const OTLP_COLLECTOR_PATH: &str = "/api/collector/traces";

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_ingest_path() -> String {
    COLLECTOR_PATH.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_user_id() -> String {
    "n8n-system".to_string()
}

fn default_label() -> String {
    "n8n".to_string()
}

fn default_shutdown_timeout_ms() -> u64 {
    10_000
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Collector API key; export is skipped when absent.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_ingest_path")]
    pub ingest_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Total attempts per export, including the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-attempt timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_endpoint(),
            ingest_path: default_ingest_path(),
            log_level: default_log_level(),
            max_retries: default_max_retries(),
            timeout_ms: default_timeout_ms(),
            user_id: default_user_id(),
            label: default_label(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl TracingConfig {
    /// Loads `.env` when present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Failed to load .env file: {}", e);
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves every key through `lookup`. Empty values count as absent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let config = Self {
            api_key: get(API_KEY_VAR),
            endpoint: get(ENDPOINT_VAR).unwrap_or(defaults.endpoint),
            ingest_path: get(PATH_VAR).unwrap_or(defaults.ingest_path),
            log_level: get(LOG_LEVEL_VAR).unwrap_or(defaults.log_level),
            max_retries: parse_number(MAX_RETRIES_VAR, get(MAX_RETRIES_VAR))?
                .unwrap_or(defaults.max_retries),
            timeout_ms: parse_number(TIMEOUT_VAR, get(TIMEOUT_VAR))?.unwrap_or(defaults.timeout_ms),
            user_id: get(USER_ID_VAR).unwrap_or(defaults.user_id),
            label: get(LABEL_VAR).unwrap_or(defaults.label),
            shutdown_timeout_ms: parse_number(SHUTDOWN_TIMEOUT_VAR, get(SHUTDOWN_TIMEOUT_VAR))?
                .unwrap_or(defaults.shutdown_timeout_ms),
        };

        Ok(config.normalized())
    }

    /// Reads a JSON document with the same field names as this struct.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: TracingConfig = serde_json::from_str(&content)?;
        Ok(config.normalized())
    }

    /// Sets the collector API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the collector base URL; a trailing `/` is dropped.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self.normalized()
    }

    /// Sets the total number of export attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the per-attempt request timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// True when an API key is configured and export will hit the network.
    pub fn export_enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Full ingestion URL.
    pub fn collector_url(&self) -> String {
        let path = self.ingest_path.trim_start_matches('/');
        format!("{}/{}", self.endpoint, path)
    }

    /// Per-attempt request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Upper bound on the shutdown drain.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    fn normalized(mut self) -> Self {
        self.endpoint = self.endpoint.trim_end_matches('/').to_string();
        self.api_key = self.api_key.filter(|k| !k.is_empty());
        self.max_retries = self.max_retries.max(1);
        self
    }
}

fn parse_number<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| v.parse::<T>().map_err(|_| ConfigError::InvalidValue { key, value: v }))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = TracingConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.api_key, None);
        assert_eq!(config.endpoint, "https://app.langwatch.ai");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout_ms, 10_000);
        assert!(!config.export_enabled());
        assert_eq!(config.collector_url(), "https://app.langwatch.ai/api/collector");
    }

    #[test]
    fn test_reads_all_keys() {
        let config = TracingConfig::from_lookup(lookup(&[
            ("COLLECTOR_API_KEY", "sk-test"),
            ("COLLECTOR_ENDPOINT", "http://localhost:5560/"),
            ("COLLECTOR_PATH", OTLP_COLLECTOR_PATH),
            ("LOG_LEVEL", "debug"),
            ("MAX_RETRIES", "5"),
            ("TIMEOUT_MS", "2500"),
        ]))
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert!(config.export_enabled());
        assert_eq!(config.collector_url(), "http://localhost:5560/api/collector/traces");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_empty_api_key_is_absent() {
        let config = TracingConfig::from_lookup(lookup(&[("COLLECTOR_API_KEY", "  ")])).unwrap();
        assert!(!config.export_enabled());
    }

    #[test]
    fn test_invalid_number_names_key() {
        let err = TracingConfig::from_lookup(lookup(&[("TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "TIMEOUT_MS", .. }));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracing.json");
        fs::write(
            &path,
            r#"{"api_key": "sk-file", "endpoint": "http://collector:5560/", "timeout_ms": 500}"#,
        )
        .unwrap();

        let config = TracingConfig::from_json_file(&path).unwrap();
        assert!(config.export_enabled());
        assert_eq!(config.collector_url(), "http://collector:5560/api/collector");
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_from_json_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = TracingConfig::from_json_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io(_)));

        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();
        let broken = TracingConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(broken, ConfigError::Parse(_)));
    }

    #[test]
    fn test_json_defaults_fill_missing_fields() {
        let config: TracingConfig =
            serde_json::from_str(r#"{"api_key": "k", "max_retries": 0}"#).unwrap();
        let config = config.normalized();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.max_retries, 1);
    }
}
