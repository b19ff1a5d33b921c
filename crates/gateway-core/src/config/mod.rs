//! Gateway configuration loaded from a YAML file.
//!
//! The schema uses camelCase keys and humantime duration strings:
//!
//! ```yaml
//! metrics:
//!   port: 9090
//! proxy:
//!   port: 3000
//!   upstreamTimeout: 1s
//!   allowedNumberOfRetriesPerTarget: 1
//!   retryDelay: 10ms
//! healthChecks:
//!   interval: 5s
//!   timeout: 2s
//!   failureThreshold: 2
//!   successThreshold: 1
//!   rollingWindowTaintEnabled: true
//!   rollingWindowSize: 100
//!   rollingWindowFailureThreshold: 0.9
//! targets:
//!   - name: primary
//!     connection:
//!       http:
//!         url: https://rpc.example.com
//!         compression: false
//!         disableKeepAlives: false
//! ```
//!
//! Configuration is validated at load time; invalid configurations are fatal
//! at startup rather than surfacing later as runtime misbehavior.

use serde::{Deserialize, Deserializer};
use std::{collections::HashSet, path::Path, time::Duration};
use thiserror::Error;

/// Errors raised while loading or validating the configuration file.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AppConfig {
    pub metrics: MetricsConfig,
    pub proxy: ProxyConfig,
    pub health_checks: HealthCheckConfig,
    pub targets: Vec<TargetConfig>,
}

/// Listener settings for the metrics endpoint (`/metrics` and `/healthz`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(deserialize_with = "de_port")]
    pub port: u16,
}

/// Listener and failover settings for the gateway itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProxyConfig {
    #[serde(deserialize_with = "de_port")]
    pub port: u16,

    /// Per-upstream deadline for a single forwarded request.
    #[serde(deserialize_with = "de_duration")]
    pub upstream_timeout: Duration,

    /// Consecutive retries against the same target before moving on.
    #[serde(default)]
    pub allowed_number_of_retries_per_target: u32,

    /// Pause between per-target retries.
    #[serde(default, deserialize_with = "de_opt_duration")]
    pub retry_delay: Option<Duration>,
}

impl ProxyConfig {
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay.unwrap_or(Duration::ZERO)
    }
}

/// Probe cadence and rolling-window taint settings shared by every target.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HealthCheckConfig {
    #[serde(deserialize_with = "de_duration")]
    pub interval: Duration,

    #[serde(deserialize_with = "de_duration")]
    pub timeout: Duration,

    /// Probes before marking a target down. Carried in the schema; the
    /// current prober acts on every sample (threshold of one).
    pub failure_threshold: u32,

    /// Probes before marking a target back up. Same caveat as above.
    pub success_threshold: u32,

    /// When enabled, a target whose rolling success rate drops below
    /// `rolling_window_failure_threshold` is tainted by the supervisor.
    #[serde(default)]
    pub rolling_window_taint_enabled: bool,

    #[serde(default = "default_rolling_window_size")]
    pub rolling_window_size: usize,

    #[serde(default = "default_rolling_window_failure_threshold")]
    pub rolling_window_failure_threshold: f64,
}

fn default_rolling_window_size() -> usize {
    100
}

fn default_rolling_window_failure_threshold() -> f64 {
    0.9
}

/// One configured upstream provider. The order of targets in the file is the
/// failover preference order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TargetConfig {
    pub name: String,
    pub connection: ConnectionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConnectionConfig {
    pub http: HttpConnectionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpConnectionConfig {
    pub url: String,

    /// Whether this provider accepts gzip-compressed request bodies.
    #[serde(default)]
    pub compression: bool,

    /// Disables connection reuse towards this provider.
    #[serde(default)]
    pub disable_keep_alives: bool,
}

impl AppConfig {
    /// Loads and validates the configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, does not parse,
    /// or fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    /// Parses and validates configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the document does not parse or fails
    /// validation.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics.port == 0 {
            return Err(ConfigError::Invalid("metrics.port must be non-zero".to_string()));
        }
        if self.proxy.port == 0 {
            return Err(ConfigError::Invalid("proxy.port must be non-zero".to_string()));
        }
        if self.proxy.upstream_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "proxy.upstreamTimeout must be greater than zero".to_string(),
            ));
        }
        if self.health_checks.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "healthChecks.interval must be greater than zero".to_string(),
            ));
        }
        if self.health_checks.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "healthChecks.timeout must be greater than zero".to_string(),
            ));
        }
        if self.targets.is_empty() {
            return Err(ConfigError::Invalid("at least one target is required".to_string()));
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.name.is_empty() {
                return Err(ConfigError::Invalid("target name cannot be empty".to_string()));
            }
            if !seen.insert(target.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate target name: {}",
                    target.name
                )));
            }

            let url = url::Url::parse(&target.connection.http.url).map_err(|e| {
                ConfigError::Invalid(format!("target {} has an invalid url: {e}", target.name))
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConfigError::Invalid(format!(
                    "target {} url must be http or https",
                    target.name
                )));
            }
        }

        if self.health_checks.rolling_window_taint_enabled {
            if self.health_checks.rolling_window_size == 0 {
                return Err(ConfigError::Invalid(
                    "healthChecks.rollingWindowSize must be greater than zero".to_string(),
                ));
            }
            let threshold = self.health_checks.rolling_window_failure_threshold;
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::Invalid(
                    "healthChecks.rollingWindowFailureThreshold must be within 0.0..=1.0"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Accepts a port given either as a YAML integer or as a quoted string.
fn de_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(port) => Ok(port),
        PortRepr::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}

/// Parses humantime duration strings such as `"1s"` or `"250ms"`.
fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn de_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
        .transpose()
}
