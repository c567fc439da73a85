use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexSet;
use serde::Deserialize;
use thiserror::Error;

use crate::duration::format_duration;
use crate::sinks::SinkConfig;

/// Polling faster than this hammers the apiserver for data that rarely
/// changes, so it is rejected outright instead of being clamped.
pub const MIN_INTERVAL: Duration = Duration::from_secs(60);

const fn default_interval() -> Duration {
    Duration::from_secs(60)
}

const fn default_timeout() -> Duration {
    Duration::from_secs(15)
}

const fn default_concurrency() -> usize {
    4
}

fn default_sink() -> Box<dyn SinkConfig> {
    Box::new(crate::sinks::console::Config::default())
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config from {path:?}, {err}")]
    Read {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("could not parse config, {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// A ConfigMap to poll, identified by namespace and name.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Target {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KubernetesConfig {
    /// Path to a kubeconfig file. When unset, `KUBECONFIG`, `~/.kube/config`
    /// and the in-cluster environment are tried in that order.
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// How often all targets are polled. The first poll happens one full
    /// interval after startup, not immediately.
    #[serde(default = "default_interval", with = "crate::duration::serde")]
    pub interval: Duration,

    /// Deadline for a single fetch. Must be strictly shorter than `interval`.
    #[serde(default = "default_timeout", with = "crate::duration::serde")]
    pub timeout: Duration,

    /// Maximum number of in-flight fetches within one poll.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Refuse to start when `configmaps` is empty.
    #[serde(default)]
    pub require_targets: bool,

    /// The ConfigMaps to poll.
    #[serde(default)]
    pub configmaps: Vec<Target>,

    #[serde(default)]
    pub kubernetes: KubernetesConfig,

    /// Where observations are delivered.
    #[serde(default = "default_sink")]
    pub sink: Box<dyn SinkConfig>,
}

impl Config {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.interval < MIN_INTERVAL {
            errors.push(format!(
                "interval {} is less than the minimum {}",
                format_duration(self.interval),
                format_duration(MIN_INTERVAL)
            ));
        }

        if self.timeout.is_zero() {
            errors.push("timeout must not be zero".to_string());
        } else if self.timeout >= self.interval {
            errors.push(format!(
                "timeout {} must be shorter than interval {}",
                format_duration(self.timeout),
                format_duration(self.interval)
            ));
        }

        if self.concurrency == 0 {
            errors.push("concurrency must be at least 1".to_string());
        }

        if self.require_targets && self.configmaps.is_empty() {
            errors.push("configmaps must not be empty when require_targets is set".to_string());
        }

        for (index, target) in self.configmaps.iter().enumerate() {
            if target.name.is_empty() {
                errors.push(format!("configmaps[{index}]: name must not be empty"));
            }

            if target.namespace.is_empty() {
                errors.push(format!("configmaps[{index}]: namespace must not be empty"));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Targets with duplicates collapsed, in first-seen order.
    pub fn targets(&self) -> IndexSet<Target> {
        self.configmaps.iter().cloned().collect()
    }
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
        path: path.to_path_buf(),
        err,
    })?;

    load_from_str(&content)
}

pub fn load_from_str(content: &str) -> Result<Config, ConfigError> {
    let config = serde_yaml::from_str::<Config>(content)?;
    config.validate().map_err(ConfigError::Invalid)?;

    Ok(config)
}
