//! # Telemetry Settings
//!
//! Configuration for the normalizer and its collectors. Read once at startup
//! and handed to whatever builds the [`Normalizer`](crate::Normalizer).
//!
//! Sources, later ones winning:
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. `TELEMETRY_*` environment variables (`.env` is honoured), with `__`
//!    separating nested keys, e.g. `TELEMETRY_LOGGING__LEVEL=debug`

use std::fmt;
use std::path::Path;
use std::time::Duration;

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::logging::LoggingConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// How forwards to the monitoring backend are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Await each forward, bounded by the forward timeout
    Await,
    /// Spawn each forward onto the runtime and move on
    Detached,
}

/// Recognized telemetry options
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Master switch for forwarding to the monitoring backend
    pub enabled: bool,
    /// Application name reported with every record
    pub app_name: String,
    /// Key presented to the collector
    pub license_key: Option<String>,
    /// Base URL of the collector
    pub collector_endpoint: Option<String>,
    /// Whether structured log events are forwarded
    pub log_forwarding_enabled: bool,
    /// Header-name prefixes the collector leaves out of captured requests
    pub exclude_header_prefixes: Vec<String>,
    /// Upper bound on forwarded records kept in memory by the collector
    pub max_samples_stored: usize,
    /// Per-forward timeout in milliseconds
    pub forward_timeout_ms: u64,
    pub dispatch: DispatchMode,
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_name: "unknown-service".to_string(),
            license_key: None,
            collector_endpoint: None,
            log_forwarding_enabled: true,
            exclude_header_prefixes: vec![
                "cookie".to_string(),
                "authorization".to_string(),
                "proxy-authorization".to_string(),
                "set-cookie".to_string(),
                "x-api-key".to_string(),
            ],
            max_samples_stored: 100,
            forward_timeout_ms: 2000,
            dispatch: DispatchMode::Await,
            logging: LoggingConfig::default(),
        }
    }
}

impl fmt::Debug for TelemetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryConfig")
            .field("enabled", &self.enabled)
            .field("app_name", &self.app_name)
            .field("license_key", &self.license_key.as_ref().map(|_| "[REDACTED]"))
            .field("collector_endpoint", &self.collector_endpoint)
            .field("log_forwarding_enabled", &self.log_forwarding_enabled)
            .field("exclude_header_prefixes", &self.exclude_header_prefixes)
            .field("max_samples_stored", &self.max_samples_stored)
            .field("forward_timeout_ms", &self.forward_timeout_ms)
            .field("dispatch", &self.dispatch)
            .field("logging", &self.logging)
            .finish()
    }
}

impl TelemetryConfig {
    /// Loads defaults, then `path` (if given), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("TELEMETRY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("exclude_header_prefixes"),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(config = ?config, "Telemetry configuration loaded");
        Ok(config)
    }

    /// Loads from the environment only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Checks value ranges and formats
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue("app_name must not be empty".into()));
        }

        if self.forward_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "forward_timeout_ms must be greater than zero".into(),
            ));
        }

        if let Some(endpoint) = &self.collector_endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigError::InvalidValue(format!(
                    "collector_endpoint must be an http(s) URL, got {}",
                    endpoint
                )));
            }
        }

        Ok(())
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    /// Whether records should be sent to a remote collector
    pub fn collector_enabled(&self) -> bool {
        self.enabled && self.collector_endpoint.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = TelemetryConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.collector_enabled());
        assert_eq!(config.forward_timeout(), Duration::from_millis(2000));
        assert!(config.exclude_header_prefixes.contains(&"cookie".to_string()));
    }

    #[test]
    fn test_license_key_redacted() {
        let config = TelemetryConfig {
            license_key: Some("super-secret".into()),
            ..TelemetryConfig::default()
        };

        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let zero_timeout = TelemetryConfig {
            forward_timeout_ms: 0,
            ..TelemetryConfig::default()
        };
        assert!(matches!(zero_timeout.validate(), Err(ConfigError::InvalidValue(_))));

        let bad_endpoint = TelemetryConfig {
            collector_endpoint: Some("collector.local:4318".into()),
            ..TelemetryConfig::default()
        };
        assert!(matches!(bad_endpoint.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
app_name = "orders-api"
collector_endpoint = "https://collector.example.com"
max_samples_stored = 10
dispatch = "detached"
exclude_header_prefixes = ["cookie", "x-internal-"]

[logging]
level = "debug"
json_format = false
"#
        )
        .unwrap();

        let config = TelemetryConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.app_name, "orders-api");
        assert_eq!(config.max_samples_stored, 10);
        assert_eq!(config.dispatch, DispatchMode::Detached);
        assert_eq!(config.exclude_header_prefixes, vec!["cookie", "x-internal-"]);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.json_format);
        assert!(config.collector_enabled());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = TelemetryConfig::load(Some(Path::new("/nonexistent/telemetry.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
