use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Replans allowed per task before it fails.
    pub max_replans: u32,
    /// Applied to steps that arrive with `max_retries == 0`.
    pub default_max_retries: u32,
    /// Backoff before retry n is `retry_backoff_base_ms * 2^n`.
    pub retry_backoff_base_ms: u64,
    /// Worker name that marks the coordinator step in hierarchical plans.
    pub coordinator_agent: String,
    /// Upper bound on concurrently running independent steps in parallel plans.
    /// `None` launches them all at once.
    pub max_parallel_steps: Option<usize>,
    /// Mirror context log lines as `LogMessage` events.
    pub publish_log_events: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_replans: 3,
            default_max_retries: orchestra_core::DEFAULT_MAX_RETRIES,
            retry_backoff_base_ms: 1000,
            coordinator_agent: "coordinator".to_string(),
            max_parallel_steps: None,
            publish_log_events: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coordinator_agent.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "coordinator_agent cannot be empty".to_string(),
            ));
        }

        if self.max_parallel_steps == Some(0) {
            return Err(ConfigError::Invalid(
                "max_parallel_steps must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Delay before the retry that follows failure number `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.retry_backoff_base_ms.saturating_mul(factor))
    }
}
