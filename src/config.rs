//! Configuration file management for staplechecker.
//!
//! Settings are layered, later layers winning:
//!
//! 1. Default values (lowest priority)
//! 2. Configuration file (staplechecker.toml or specified with --config)
//! 3. Command-line arguments (highest priority)
//!
//! # Example Configuration File
//!
//! ```toml
//! hosts = ["example.com", "nats://demo.nats.io:4222"]
//! output = "summary"
//! exit_code = 1
//! check_freshness = true
//! max_clock_skew_secs = 300
//! ca_file = "/etc/ssl/certs/ca.pem"
//!
//! [prometheus]
//! enabled = true
//! address = "http://localhost:9091"
//! ```

use crate::client::ClientOptions;
use crate::validator::{ValidatorOptions, DEFAULT_MAX_CLOCK_SKEW};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
///
/// All fields are optional to support partial configuration and merging.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// List of hosts to check
    pub hosts: Option<Vec<String>>,
    /// Output format: json, text, summary
    pub output: Option<String>,
    /// Exit code to use when any staple is rejected
    pub exit_code: Option<i32>,
    /// Reject staples outside their thisUpdate/nextUpdate window
    pub check_freshness: Option<bool>,
    /// Clock skew tolerated by the freshness check, in seconds
    pub max_clock_skew_secs: Option<u64>,
    /// CA bundle used to verify servers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
    /// Client certificate chain (PEM)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<String>,
    /// Client private key (PEM)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    /// Prometheus configuration
    pub prometheus: Option<PrometheusConfig>,
}

/// Prometheus push gateway settings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PrometheusConfig {
    /// Enable prometheus metrics pushing
    pub enabled: Option<bool>,
    /// Prometheus push gateway address (e.g., "http://localhost:9091")
    pub address: Option<String>,
}

impl Default for Config {
    /// - `hosts`: None (must be provided)
    /// - `output`: "text"
    /// - `exit_code`: 1
    /// - `check_freshness`: false
    /// - `max_clock_skew_secs`: 300
    /// - `prometheus.enabled`: false
    /// - `prometheus.address`: "http://localhost:9091"
    fn default() -> Self {
        Config {
            hosts: None,
            output: Some("text".to_string()),
            exit_code: Some(1),
            check_freshness: Some(false),
            max_clock_skew_secs: Some(DEFAULT_MAX_CLOCK_SKEW.as_secs()),
            ca_file: None,
            client_cert: None,
            client_key: None,
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://localhost:9091".to_string()),
            }),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use staplechecker::config::Config;
    /// let config = Config::from_file("staplechecker.toml")?;
    /// # Ok::<(), staplechecker::config::ConfigError>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// An empty layer: every field unset.
    pub fn empty() -> Self {
        Config {
            hosts: None,
            output: None,
            exit_code: None,
            check_freshness: None,
            max_clock_skew_secs: None,
            ca_file: None,
            client_cert: None,
            client_key: None,
            prometheus: None,
        }
    }

    /// Merges this configuration with another, prioritizing the other's values.
    pub fn merge_with(mut self, other: Config) -> Self {
        if other.hosts.is_some() {
            self.hosts = other.hosts;
        }
        if other.output.is_some() {
            self.output = other.output;
        }
        if other.exit_code.is_some() {
            self.exit_code = other.exit_code;
        }
        if other.check_freshness.is_some() {
            self.check_freshness = other.check_freshness;
        }
        if other.max_clock_skew_secs.is_some() {
            self.max_clock_skew_secs = other.max_clock_skew_secs;
        }
        if other.ca_file.is_some() {
            self.ca_file = other.ca_file;
        }
        if other.client_cert.is_some() {
            self.client_cert = other.client_cert;
        }
        if other.client_key.is_some() {
            self.client_key = other.client_key;
        }
        if let Some(other_prom) = other.prometheus {
            if let Some(ref mut self_prom) = self.prometheus {
                if other_prom.enabled.is_some() {
                    self_prom.enabled = other_prom.enabled;
                }
                if other_prom.address.is_some() {
                    self_prom.address = other_prom.address;
                }
            } else {
                self.prometheus = Some(other_prom);
            }
        }
        self
    }

    /// Checks the merged configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.hosts {
            Some(hosts) if !hosts.is_empty() => {}
            _ => {
                return Err(ConfigError::Validation(
                    "at least one host is required".to_string(),
                ))
            }
        }
        if self.client_cert.is_some() != self.client_key.is_some() {
            return Err(ConfigError::Validation(
                "client_cert and client_key must be set together".to_string(),
            ));
        }
        if self.prometheus_enabled() && self.prometheus_address().is_none() {
            return Err(ConfigError::Validation(
                "prometheus is enabled but no address is set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validator_options(&self) -> ValidatorOptions {
        ValidatorOptions {
            check_freshness: self.check_freshness.unwrap_or(false),
            max_clock_skew: self
                .max_clock_skew_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_MAX_CLOCK_SKEW),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            ca_file: self.ca_file.as_ref().map(PathBuf::from),
            client_cert: self.client_cert.as_ref().map(PathBuf::from),
            client_key: self.client_key.as_ref().map(PathBuf::from),
            ..ClientOptions::default()
        }
    }

    pub fn prometheus_enabled(&self) -> bool {
        self.prometheus
            .as_ref()
            .and_then(|prom| prom.enabled)
            .unwrap_or(false)
    }

    pub fn prometheus_address(&self) -> Option<&str> {
        self.prometheus
            .as_ref()
            .and_then(|prom| prom.address.as_deref())
    }

    /// Generates an example configuration file in TOML format.
    pub fn example_toml() -> String {
        let example = Config {
            hosts: Some(vec![
                "example.com".to_string(),
                "example.com:8443".to_string(),
                "nats://demo.nats.io:4222".to_string(),
            ]),
            output: Some("summary".to_string()),
            exit_code: Some(1),
            check_freshness: Some(true),
            max_clock_skew_secs: Some(300),
            ca_file: Some("/etc/ssl/certs/ca-certificates.crt".to_string()),
            client_cert: None,
            client_key: None,
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://localhost:9091".to_string()),
            }),
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    Parse(String),
    /// Validation error (missing required fields, invalid values, etc.)
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "IO Error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse Error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
