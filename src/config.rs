//! Configuration Management
//!
//! Handles persistent client configuration for lxdc: a YAML file under the
//! user config directory, overlaid by `LXDC_*` environment variables.

use crate::error::{Error, Result};
use crate::model::WarningPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default daemon endpoint
pub const DEFAULT_ENDPOINT: &str = "https://127.0.0.1:8443";

/// Bounds for the short-poll interval
const MIN_POLL_INTERVAL_MS: u64 = 10;
const MAX_POLL_INTERVAL_MS: u64 = 5_000;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Daemon endpoint (http or https URL)
    pub endpoint: String,
    /// Project every request is scoped to
    pub project: Option<String>,
    /// Client certificate (PEM)
    pub cert: Option<PathBuf>,
    /// Client private key (PEM)
    pub key: Option<PathBuf>,
    /// Additional trusted server certificate (PEM)
    pub server_cert: Option<PathBuf>,
    /// Verify the server certificate
    pub verify: bool,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Unknown-attribute warning verbosity
    pub warnings: WarningPolicy,
    /// Server-side timeout of a single `/wait` long-poll
    pub operation_wait_secs: u64,
    /// Short-poll interval for operations and exec completion
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            project: None,
            cert: None,
            key: None,
            server_cert: None,
            verify: true,
            timeout_secs: 30,
            warnings: WarningPolicy::default(),
            operation_wait_secs: 30,
            poll_interval_ms: 500,
        }
    }
}

impl Config {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("lxdc").join("config.yml"))
    }

    /// Load configuration from disk, then apply environment overrides.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)?;
                serde_yaml::from_str(&content)
                    .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Overlay `LXDC_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = var("LXDC_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(project) = var("LXDC_PROJECT") {
            self.project = Some(project).filter(|p| !p.is_empty());
        }
        if let Some(cert) = var("LXDC_CERT") {
            self.cert = Some(PathBuf::from(cert));
        }
        if let Some(key) = var("LXDC_KEY") {
            self.key = Some(PathBuf::from(key));
        }
        if let Some(verify) = var("LXDC_VERIFY") {
            self.verify = !matches!(verify.to_lowercase().as_str(), "0" | "false" | "no");
        }
        if let Some(policy) = var("LXDC_WARNINGS") {
            self.warnings = WarningPolicy::from_str(&policy);
        }
    }

    /// Set the endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Scope requests to a project
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Use a client certificate and key
    pub fn with_identity(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.cert = Some(cert.into());
        self.key = Some(key.into());
        self
    }

    /// Enable or disable server certificate verification
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Set the unknown-attribute warning policy
    pub fn with_warnings(mut self, policy: WarningPolicy) -> Self {
        self.warnings = policy;
        self
    }

    /// Set the short-poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Per-request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Short-poll interval, clamped so polling never spins or stalls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS),
        )
    }
}
