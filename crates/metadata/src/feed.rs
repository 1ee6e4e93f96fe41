use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::MetadataError;
use crate::watch::{contains_delimiter, WatchSpec};

/// Default gateway host
pub const DEFAULT_GATEWAY_HOST: &str = "127.0.0.1";
/// Default port of the gateway's derivative (interval bar) socket
pub const DEFAULT_DERIV_PORT: u16 = 9400;
/// Wire protocol version this client speaks
pub const DEFAULT_PROTOCOL: &str = "6.0";
/// Default client name announced during the handshake
pub const DEFAULT_CLIENT_NAME: &str = "BarFeed";
/// Bounded wait for a single socket read
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 5;
/// Bounded wait when joining a worker task
pub const DEFAULT_JOIN_TIMEOUT_SECS: u64 = 30;
/// Default event queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
/// Default health server bind address
pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8080";

fn default_host() -> String {
    DEFAULT_GATEWAY_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_DERIV_PORT
}

fn default_protocol() -> String {
    DEFAULT_PROTOCOL.to_string()
}

fn default_client_name() -> String {
    DEFAULT_CLIENT_NAME.to_string()
}

fn default_read_timeout_secs() -> u64 {
    DEFAULT_READ_TIMEOUT_SECS
}

fn default_join_timeout_secs() -> u64 {
    DEFAULT_JOIN_TIMEOUT_SECS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_health_addr() -> String {
    DEFAULT_HEALTH_ADDR.to_string()
}

/// Where the gateway listens and how to talk to it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            protocol: default_protocol(),
            client_name: default_client_name(),
            read_timeout_secs: default_read_timeout_secs(),
            join_timeout_secs: default_join_timeout_secs(),
        }
    }
}

impl GatewayConfig {
    /// `host:port` for socket connect
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,
    /// Persist still-forming (update) bars as well as completed ones
    #[serde(default)]
    pub persist_updates: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            join_timeout_secs: default_join_timeout_secs(),
            persist_updates: false,
        }
    }
}

impl QueueConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NotifierConfig {
    /// Directory for the daily text log (file channel disabled when unset)
    pub log_dir: Option<PathBuf>,
}

/// Top-level connector configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    pub name: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub watches: Vec<WatchSpec>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default = "default_health_addr")]
    pub health_addr: String,
}

impl FeedConfig {
    /// Load from a YAML file, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, MetadataError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Override gateway and database settings from the process environment.
    ///
    /// Recognised: `IQFEED_HOST`, `IQFEED_PORT_DERIV`, `DATABASE_URL`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("IQFEED_HOST") {
            self.gateway.host = host;
        }
        if let Some(port) = lookup("IQFEED_PORT_DERIV").and_then(|p| p.parse().ok()) {
            self.gateway.port = port;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.name.trim().is_empty() {
            return Err(MetadataError::Validation("feed name is empty".into()));
        }
        if contains_delimiter(&self.gateway.client_name) {
            return Err(MetadataError::Validation(
                "client_name must not contain ',' or line breaks".into(),
            ));
        }
        if self.gateway.read_timeout_secs == 0 {
            return Err(MetadataError::Validation(
                "gateway read_timeout_secs must be > 0".into(),
            ));
        }
        if self.gateway.join_timeout_secs == 0 {
            return Err(MetadataError::Validation(
                "gateway join_timeout_secs must be > 0".into(),
            ));
        }
        if self.queue.capacity == 0 {
            return Err(MetadataError::Validation("queue capacity must be > 0".into()));
        }
        if self.queue.join_timeout_secs == 0 {
            return Err(MetadataError::Validation(
                "queue join_timeout_secs must be > 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for watch in &self.watches {
            watch.validate()?;
            if !seen.insert(watch.symbol.as_str()) {
                return Err(MetadataError::Validation(format!(
                    "symbol {} is watched more than once",
                    watch.symbol
                )));
            }
        }
        Ok(())
    }

    /// Symbols that are allowed to reach the store
    pub fn symbols(&self) -> Vec<String> {
        self.watches.iter().map(|w| w.symbol.clone()).collect()
    }
}
