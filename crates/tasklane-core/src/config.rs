//! BrokerConfig - 起動時設定
//!
//! TOML から読み、`TASKLANE_*` 環境変数で上書きする。全フィールドに既定値があるので
//! 空ファイルでも起動できる。検証は `BrokerBuilder::build` で一度だけ行う（fail-fast）。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {name} has invalid value {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("{field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    pub topic_name: String,
    pub partition_count: u16,
    pub lock_expiration_interval_ms: u64,
    /// Pending requests each partition actor buffers before callers wait.
    pub request_channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            topic_name: "default-topic".to_string(),
            partition_count: 1,
            lock_expiration_interval_ms: 30_000,
            request_channel_capacity: 1024,
        }
    }
}

impl BrokerConfig {
    pub const ENV_TOPIC_NAME: &'static str = "TASKLANE_TOPIC_NAME";
    pub const ENV_PARTITION_COUNT: &'static str = "TASKLANE_PARTITION_COUNT";
    pub const ENV_LOCK_EXPIRATION_INTERVAL_MS: &'static str = "TASKLANE_LOCK_EXPIRATION_INTERVAL_MS";
    pub const ENV_REQUEST_CHANNEL_CAPACITY: &'static str = "TASKLANE_REQUEST_CHANNEL_CAPACITY";

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `TASKLANE_*` variables from the process environment.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(topic_name) = lookup(Self::ENV_TOPIC_NAME) {
            self.topic_name = topic_name;
        }
        if let Some(value) = lookup(Self::ENV_PARTITION_COUNT) {
            self.partition_count = parse_env(Self::ENV_PARTITION_COUNT, value)?;
        }
        if let Some(value) = lookup(Self::ENV_LOCK_EXPIRATION_INTERVAL_MS) {
            self.lock_expiration_interval_ms =
                parse_env(Self::ENV_LOCK_EXPIRATION_INTERVAL_MS, value)?;
        }
        if let Some(value) = lookup(Self::ENV_REQUEST_CHANNEL_CAPACITY) {
            self.request_channel_capacity = parse_env(Self::ENV_REQUEST_CHANNEL_CAPACITY, value)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic_name.trim().is_empty() {
            return Err(invalid("topic_name", "must not be empty"));
        }
        if self.partition_count == 0 {
            return Err(invalid("partition_count", "must be at least 1"));
        }
        if self.lock_expiration_interval_ms == 0 {
            return Err(invalid("lock_expiration_interval_ms", "must be positive"));
        }
        if self.request_channel_capacity == 0 {
            return Err(invalid("request_channel_capacity", "must be positive"));
        }
        Ok(())
    }

    pub fn lock_expiration_interval(&self) -> Duration {
        Duration::from_millis(self.lock_expiration_interval_ms)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}

fn invalid(field: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid { field, reason }
}
