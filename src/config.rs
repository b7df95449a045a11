//! Configuration for the chat server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8080;
pub const MAX_CLIENTS: usize = 50;
pub const LISTEN_BACKLOG: u32 = 10;
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 30;
pub const SHUTDOWN_GRACE_SECS: u64 = 5;
pub const STATS_INTERVAL_SECS: u64 = 300;

/// Command-line arguments for the chat server
#[derive(Parser, Debug, Default)]
#[command(name = "chat-server")]
#[command(version)]
#[command(about = "Multi-client TCP chat relay", long_about = None)]
pub struct CliArgs {
    /// Port to listen on (default 8080)
    pub port: Option<u16>,

    /// Address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Maximum number of simultaneous clients
    #[arg(short = 'm', long)]
    pub max_clients: Option<usize>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_clients: usize,
    pub backlog: u32,
    /// Seconds a new connection has to send its `Connect` frame
    pub handshake_timeout: u64,
    /// Seconds to wait for handlers after a stop request
    pub shutdown_grace: u64,
    /// Seconds between statistics reports, 0 disables them
    pub stats_interval: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_clients: MAX_CLIENTS,
            backlog: LISTEN_BACKLOG,
            handshake_timeout: HANDSHAKE_TIMEOUT_SECS,
            shutdown_grace: SHUTDOWN_GRACE_SECS,
            stats_interval: STATS_INTERVAL_SECS,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    /// Port to bind; 0 picks an ephemeral port (only reachable programmatically)
    pub port: u16,
    pub max_clients: usize,
    pub backlog: u32,
    pub handshake_timeout: Duration,
    pub shutdown_grace: Duration,
    pub stats_interval: Option<Duration>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from process arguments and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve parsed CLI args against the TOML file they name, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents =
                std::fs::read_to_string(config_path).map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let server = toml_config.server;
        Config {
            host: cli.host.unwrap_or(server.host),
            port: cli.port.unwrap_or(server.port),
            max_clients: cli.max_clients.unwrap_or(server.max_clients),
            backlog: server.backlog,
            handshake_timeout: Duration::from_secs(server.handshake_timeout),
            shutdown_grace: Duration::from_secs(server.shutdown_grace),
            stats_interval: (server.stats_interval > 0)
                .then(|| Duration::from_secs(server.stats_interval)),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.max_clients == 0 {
            return Err(ConfigError::InvalidMaxClients);
        }
        if self.backlog == 0 {
            return Err(ConfigError::InvalidBacklog);
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::InvalidHandshakeTimeout);
        }
        Ok(())
    }

    /// `host:port` as given.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("port must be between 1 and 65535")]
    InvalidPort,

    #[error("max_clients must be at least 1")]
    InvalidMaxClients,

    #[error("backlog must be at least 1")]
    InvalidBacklog,

    #[error("handshake_timeout must be at least 1 second")]
    InvalidHandshakeTimeout,
}
