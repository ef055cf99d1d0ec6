use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::chuck::chunk::{DEFAULT_CHUNK_SIZE, DEFAULT_META_CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::lock::DEFAULT_LOCK_POLL_INTERVAL;
use crate::shard::DEFAULT_DELIMITER;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory instance name; prefixes every lock key.
    pub name: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_meta_chunk_size")]
    pub meta_chunk_size: usize,
    /// Spreads data rows over several physical keys when present.
    #[serde(default)]
    pub sharding: Option<ShardingConfig>,
    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShardingConfig {
    pub shards: usize,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    #[default]
    Memory,
    Etcd(EtcdConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    /// Namespace for this directory's rows; data and metadata live under
    /// `<prefix>/data` and `<prefix>/meta`.
    pub prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_meta_chunk_size() -> usize {
    DEFAULT_META_CHUNK_SIZE
}

fn default_lock_poll_interval_ms() -> u64 {
    DEFAULT_LOCK_POLL_INTERVAL.as_millis() as u64
}

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_string()
}

impl Config {
    /// In-memory configuration with default sizes and no sharding.
    pub fn memory(name: &str) -> Self {
        Self {
            name: name.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            meta_chunk_size: DEFAULT_META_CHUNK_SIZE,
            sharding: None,
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
            backend: BackendConfig::Memory,
        }
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("name must not be empty".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.meta_chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "meta_chunk_size must be positive".into(),
            ));
        }
        if let Some(sharding) = &self.sharding {
            if sharding.shards == 0 {
                return Err(Error::InvalidConfig("sharding.shards must be positive".into()));
            }
            if sharding.delimiter.is_empty() {
                return Err(Error::InvalidConfig(
                    "sharding.delimiter must not be empty".into(),
                ));
            }
        }
        if let BackendConfig::Etcd(etcd) = &self.backend {
            if etcd.endpoints.is_empty() {
                return Err(Error::InvalidConfig(
                    "etcd backend needs at least one endpoint".into(),
                ));
            }
            if etcd.prefix.is_empty() {
                return Err(Error::InvalidConfig("etcd prefix must not be empty".into()));
            }
        }
        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let cfg: Config = serde_yaml::from_str(content)?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}
