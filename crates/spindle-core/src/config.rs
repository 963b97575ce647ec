//! SpindleConfig - ファイルと環境変数からの設定読み込み
//!
//! 読み込み順（後勝ち）:
//! 1. `config/spindle.toml`（任意）
//! 2. `SPINDLE__` で始まる環境変数（例: `SPINDLE__REDIS__URL`）

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::app::WorkerConfig;

pub use config::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SpindleConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub log: LogConfig,
    /// Queue names the CLI operates on.
    #[serde(default)]
    pub queues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub execution_timeout_ms: Option<u64>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            execution_timeout_ms: None,
        }
    }
}

impl From<&WorkerSettings> for WorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            execution_timeout: settings.execution_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

const fn default_poll_interval_ms() -> u64 {
    1_000
}

impl SpindleConfig {
    pub fn load() -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("config/spindle").required(false))
            .add_source(environment())
            .build()?
            .try_deserialize()
    }

    /// Load from a specific file, still overridable from the environment.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(environment())
            .build()?
            .try_deserialize()
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::from(&self.worker)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("SPINDLE")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("queues")
}
