//! deployd.toml configuration parser.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working local configuration. The parsed struct is passed by value into
//! each component's constructor.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeploydConfig {
    pub server: ServerConfig,
    pub cluster: ClusterConfig,
    pub reconcile: ReconcileConfig,
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Port for the request-submission API.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    /// Namespace watched by the reconciliation controllers.
    pub namespace: String,
    /// Run against the in-process cluster instead of a real one.
    pub local: bool,
    /// In local mode, how long created objects take to become ready (e.g. "1s").
    pub ready_delay: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Worker tasks per watched resource kind.
    pub threadiness: usize,
    /// Consecutive failures before a key is dropped.
    pub max_retries: u32,
    /// How long a controller waits for its initial cache sync (e.g. "30s").
    pub cache_sync_timeout: String,
    /// First retry delay for a failed key (e.g. "5ms").
    pub backoff_base: String,
    /// Upper bound for the per-key retry delay (e.g. "1000s").
    pub backoff_max: String,
    /// Retry keys whose object is labelled but not registered yet.
    pub requeue_unregistered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of fragment outcomes kept for the API.
    pub history_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 5200 }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            local: true,
            ready_delay: "1s".to_string(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            threadiness: 1,
            max_retries: 5,
            cache_sync_timeout: "30s".to_string(),
            backoff_base: "5ms".to_string(),
            backoff_max: "1000s".to_string(),
            requeue_unregistered: true,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { history_size: 100 }
    }
}

impl DeploydConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: DeploydConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("cluster.namespace must not be empty".into()));
        }
        if self.reconcile.threadiness == 0 {
            return Err(ConfigError::Invalid("reconcile.threadiness must be at least 1".into()));
        }
        if self.reconcile.max_retries == 0 {
            return Err(ConfigError::Invalid("reconcile.max_retries must be at least 1".into()));
        }
        let base = self.reconcile.backoff_base()?;
        let max = self.reconcile.backoff_max()?;
        if base > max {
            return Err(ConfigError::Invalid(
                "reconcile.backoff_base exceeds reconcile.backoff_max".into(),
            ));
        }
        self.reconcile.cache_sync_timeout()?;
        self.cluster.ready_delay()?;
        Ok(())
    }
}

impl ClusterConfig {
    pub fn ready_delay(&self) -> Result<Duration, ConfigError> {
        duration_field("cluster.ready_delay", &self.ready_delay)
    }
}

impl ReconcileConfig {
    pub fn cache_sync_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("reconcile.cache_sync_timeout", &self.cache_sync_timeout)
    }

    pub fn backoff_base(&self) -> Result<Duration, ConfigError> {
        duration_field("reconcile.backoff_base", &self.backoff_base)
    }

    pub fn backoff_max(&self) -> Result<Duration, ConfigError> {
        duration_field("reconcile.backoff_max", &self.backoff_max)
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins = mins.parse::<u64>().ok()?;
        mins.checked_mul(60).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
