use serde::Deserialize;
use std::time::Duration;
use std::{fs, path::Path};

use crate::core::connection::ConnectionOptions;
use crate::core::keys::{Keys, DEFAULT_NAMESPACE};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub ttl_secs: u64,
    pub interval_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            interval_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConsumerConfig {
    pub prefetch_limit: usize,
    pub poll_interval_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            prefetch_limit: 10,
            poll_interval_ms: 100,
        }
    }
}

impl ConsumerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CleanerConfig {
    pub interval_secs: u64,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub heartbeat: HeartbeatConfig,
    pub consumer: ConsumerConfig,
    pub cleaner: CleanerConfig,
}

impl Config {
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            keys: Keys::new(self.store.namespace.clone()),
            heartbeat_ttl: Duration::from_secs(self.heartbeat.ttl_secs),
            heartbeat_interval: Duration::from_millis(self.heartbeat.interval_ms),
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, anyhow::Error> {
    let raw: String = fs::read_to_string(path)?;
    parse_config(&raw)
}

pub fn parse_config(raw: &str) -> Result<Config, anyhow::Error> {
    let config: Config = toml::from_str(raw)?;
    config.connection_options().validate()?;
    Ok(config)
}
