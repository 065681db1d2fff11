use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {detail}", path.display())]
    Io { path: PathBuf, detail: String },

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {field}: {detail}")]
    Invalid { field: &'static str, detail: String },
}

/// How a batch of upserts is awaited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpsertPolicy {
    /// Run every write concurrently, wait for all, notify per item.
    #[default]
    AwaitAll,
    /// Run every write concurrently, resolve on the first one to settle and
    /// send a single notification for the batch. Remaining writes finish
    /// detached.
    FirstSettled,
}

impl FromStr for UpsertPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "await-all" => Ok(Self::AwaitAll),
            "first-settled" => Ok(Self::FirstSettled),
            other => Err(format!("unknown upsert policy: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub upsert_policy: UpsertPolicy,
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
    /// Mirror every notification into the log.
    pub log_notifications: bool,
    /// Capacity of the in-process notification channel.
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("wasync.db"),
            upsert_policy: UpsertPolicy::default(),
            webhook_url: None,
            webhook_timeout_secs: 10,
            log_notifications: true,
            channel_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_owned(),
            detail: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "channel_capacity",
                detail: "must be at least 1".into(),
            });
        }
        if self.webhook_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "webhook_timeout_secs",
                detail: "must be at least 1".into(),
            });
        }
        if let Some(url) = &self.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    field: "webhook_url",
                    detail: format!("expected an http(s) url, got {url}"),
                });
            }
        }
        Ok(())
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}
