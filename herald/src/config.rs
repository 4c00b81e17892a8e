//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: `HERALD_`, `__` separates sections,
//!    e.g. `HERALD_SERVER__PUBLISH_PORT=9000`)
//! 2. An explicit file passed to [`Config::load`]
//! 3. Current working directory: ./config.toml
//! 4. XDG config directory: ~/.config/herald/config.toml
//! 5. System directory: /etc/herald/config.toml
//! 6. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::ids::SnowflakeAllocator;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Service identity and logging
    #[serde(default)]
    pub service: ServiceConfig,

    /// Listener addresses and limits
    #[serde(default)]
    pub server: ServerConfig,

    /// Stream listener behaviour
    #[serde(default)]
    pub stream: StreamConfig,

    /// Broker delivery and ID allocation
    #[serde(default)]
    pub broker: BrokerConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    #[serde(default = "default_name")]
    pub name: String,

    /// Log filter directive (trace, debug, info, warn, error, or a full EnvFilter)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface both listeners bind to
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port for `POST /push` and `GET /health`
    #[serde(default = "default_publish_port")]
    pub publish_port: u16,

    /// Port for the `GET /event` stream
    #[serde(default = "default_stream_port")]
    pub stream_port: u16,

    /// Maximum publish request body in kilobytes
    #[serde(default = "default_body_limit_kb")]
    pub body_limit_kb: usize,
}

/// Stream listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Seconds between keep-alive comments on idle streams (0 = disabled)
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

/// Broker configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Longest wait for one recipient to accept an event, in milliseconds
    /// (0 = wait as long as it takes)
    #[serde(default)]
    pub delivery_timeout_ms: u64,

    /// Snowflake worker ID mixed into every allocated ID (0..=1023)
    #[serde(default)]
    pub worker_id: u16,
}

impl ServerConfig {
    /// Address of the publish listener
    pub fn publish_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.publish_port)
    }

    /// Address of the stream listener
    pub fn stream_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.stream_port)
    }

    /// Body limit in bytes
    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_kb * 1024
    }
}

impl StreamConfig {
    /// Keep-alive interval, or `None` if disabled
    pub fn keep_alive_interval(&self) -> Option<Duration> {
        if self.keep_alive_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.keep_alive_secs))
        }
    }
}

impl BrokerConfig {
    /// Per-recipient delivery timeout, or `None` for a strict blocking handoff
    pub fn delivery_timeout(&self) -> Option<Duration> {
        if self.delivery_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.delivery_timeout_ms))
        }
    }
}

// Default value functions
fn default_name() -> String {
    "herald".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_publish_port() -> u16 {
    8080
}

fn default_stream_port() -> u16 {
    8081
}

fn default_body_limit_kb() -> usize {
    64
}

fn default_keep_alive_secs() -> u64 {
    15
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            publish_port: default_publish_port(),
            stream_port: default_stream_port(),
            body_limit_kb: default_body_limit_kb(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl Config {
    /// Load configuration from all sources
    ///
    /// `explicit` is a file named on the command line. Unlike the searched
    /// locations it must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // lowest priority first, so later files override earlier ones
        for path in Self::find_config_paths().iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(Error::InvalidConfig(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            tracing::info!("Loading configuration from: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }

        let config: Config = figment.merge(Env::prefixed("HERALD_").split("__")).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would only fail later at bind or allocation time
    pub fn validate(&self) -> Result<()> {
        if self.server.publish_port == self.server.stream_port && self.server.publish_port != 0 {
            return Err(Error::InvalidConfig(format!(
                "publish_port and stream_port must differ (both {})",
                self.server.publish_port
            )));
        }

        if self.broker.worker_id > SnowflakeAllocator::MAX_WORKER_ID {
            return Err(Error::InvalidConfig(format!(
                "broker.worker_id must be <= {}, got {}",
                SnowflakeAllocator::MAX_WORKER_ID,
                self.broker.worker_id
            )));
        }

        Ok(())
    }

    /// Config file locations in priority order (highest first)
    fn find_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix("herald");
        if let Some(path) = xdg_dirs.find_config_file("config.toml") {
            paths.push(path);
        }

        paths.push(PathBuf::from("/etc/herald/config.toml"));
        paths
    }
}
