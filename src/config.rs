//! Configuration module for the respkv server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Which front ends to start
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frontend {
    /// Readiness-driven event loop (mio)
    Event,
    /// One tokio task per connection
    Tasks,
    /// Both, each on its own address
    Both,
}

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "respkv")]
#[command(version)]
#[command(about = "A RESP key-value front end", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Front ends to run
    #[arg(short, long, value_enum)]
    pub frontend: Option<Frontend>,

    /// Address for the event-loop front end (e.g., 0.0.0.0:6383)
    #[arg(long)]
    pub event_listen: Option<String>,

    /// Address for the task-per-connection front end (e.g., 0.0.0.0:6382)
    #[arg(long)]
    pub task_listen: Option<String>,

    /// Number of event-loop worker threads (0 = number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum concurrent connections per front end
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Most bytes taken from a socket in one read
    #[arg(long)]
    pub read_buffer_cap: Option<usize>,

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
pub struct ServerConfig {
    #[serde(default = "default_frontend")]
    pub frontend: Frontend,
    #[serde(default = "default_event_listen")]
    pub event_listen: String,
    #[serde(default = "default_task_listen")]
    pub task_listen: String,
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_read_buffer_cap")]
    pub read_buffer_cap: usize,
    /// Events drained per poll in the event loop
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            frontend: default_frontend(),
            event_listen: default_event_listen(),
            task_listen: default_task_listen(),
            workers: 0,
            max_connections: default_max_connections(),
            read_buffer_cap: default_read_buffer_cap(),
            batch_size: default_batch_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
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

fn default_frontend() -> Frontend {
    Frontend::Both
}

fn default_event_listen() -> String {
    "0.0.0.0:6383".to_string()
}

fn default_task_listen() -> String {
    "0.0.0.0:6382".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_read_buffer_cap() -> usize {
    8 * 1024 * 1024 // 8 MB
}

fn default_batch_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub frontend: Frontend,
    pub event_listen: SocketAddr,
    pub task_listen: SocketAddr,
    pub workers: usize,
    pub max_connections: usize,
    pub read_buffer_cap: usize,
    pub batch_size: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let server = toml_config.server;

        Ok(Config {
            frontend: cli.frontend.unwrap_or(server.frontend),
            event_listen: parse_addr(cli.event_listen.unwrap_or(server.event_listen))?,
            task_listen: parse_addr(cli.task_listen.unwrap_or(server.task_listen))?,
            workers: cli.workers.unwrap_or(server.workers),
            max_connections: cli.max_connections.unwrap_or(server.max_connections),
            read_buffer_cap: cli.read_buffer_cap.unwrap_or(server.read_buffer_cap),
            batch_size: server.batch_size,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    /// Worker thread count with 0 resolved to the CPU count
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.workers
        }
    }
}

fn parse_addr(addr: String) -> Result<SocketAddr, ConfigError> {
    addr.parse()
        .map_err(|e| ConfigError::InvalidAddress(addr.clone(), e))
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, toml::de::Error),
    #[error("Invalid listen address '{0}': {1}")]
    InvalidAddress(String, std::net::AddrParseError),
}
