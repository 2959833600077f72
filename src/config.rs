//! Configuration module for the ackline server and client.
//!
//! Both binaries read a TOML file once at startup; nothing is reloaded at
//! runtime. The server takes no other arguments. The client additionally
//! takes an optional session mode.

use crate::client::{Backoff, RetryPolicy};
use clap::Parser;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Config file read by the server when `--config` is not given
pub const DEFAULT_SERVER_CONFIG: &str = "server.toml";

/// Config file read by the client when `--config` is not given
pub const DEFAULT_CLIENT_CONFIG: &str = "client.toml";

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "ackline-server")]
#[command(version)]
#[command(about = "Line-oriented TCP server that acknowledges every message", long_about = None)]
pub struct ServerArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Command-line arguments for the client
#[derive(Parser, Debug)]
#[command(name = "ackline-client")]
#[command(version)]
#[command(about = "Client for the ackline server", long_about = None)]
pub struct ClientArgs {
    /// Session mode: `interactive` or `automated` (default)
    pub mode: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Which message sequence the client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientMode {
    #[default]
    Automated,
    Interactive,
}

impl FromStr for ClientMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "automated" => Ok(ClientMode::Automated),
            "interactive" => Ok(ClientMode::Interactive),
            other => Err(ConfigError::Invalid(format!("unknown mode '{}'", other))),
        }
    }
}

/// Server configuration file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[server]` section
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on (0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Ceiling on concurrently served connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum message payload in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// How long `stop` waits for handlers before force-closing them
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            buffer_size: default_buffer_size(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl ServerSettings {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1".into()));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Client configuration file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backoff shape selectable from the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Linear,
    Exponential,
}

/// `[client]` section
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_port")]
    pub server_port: u16,
    /// Bound on a single connection attempt
    #[serde(default = "default_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Total connection attempts before giving up
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Bound on waiting for one acknowledgment
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub backoff: BackoffKind,
    /// Fixed delay, linear step, or exponential starting delay
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Cap for exponential backoff
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Largest message the client will send
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            server_port: default_port(),
            connection_timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            read_timeout_ms: default_timeout_ms(),
            backoff: BackoffKind::default(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl ClientSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Builds the retry policy described by this section.
    pub fn retry_policy(&self) -> RetryPolicy {
        let delay = Duration::from_millis(self.backoff_ms);
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed(delay),
            BackoffKind::Linear => Backoff::Linear(delay),
            BackoffKind::Exponential => Backoff::Exponential {
                initial: delay,
                max: Duration::from_millis(self.max_backoff_ms),
            },
        };
        RetryPolicy::new(self.retry_attempts, backoff)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid("retry_attempts must be at least 1".into()));
        }
        if self.connection_timeout_ms == 0 || self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// `[logging]` section, shared by both binaries
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also append log lines to this file
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Log to stderr
    #[serde(default = "default_console")]
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            console: default_console(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_host() -> String {
    crate::DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    crate::DEFAULT_PORT
}

fn default_max_connections() -> usize {
    crate::DEFAULT_MAX_CONNECTIONS
}

fn default_buffer_size() -> usize {
    crate::DEFAULT_BUFFER_SIZE
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    2_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_console() -> bool {
    true
}

/// Where the loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// The default file was absent; built-in values are in use
    Defaults(PathBuf),
}

impl ConfigSource {
    /// Reports the source once logging is up.
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => {
                info!(path = %path.display(), "Configuration loaded")
            }
            ConfigSource::Defaults(path) => warn!(
                path = %path.display(),
                "Configuration file not found, using default values"
            ),
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Defaults(_) => write!(f, "defaults"),
        }
    }
}

impl ServerConfig {
    /// Loads the server config from `path`, or from `server.toml` if absent.
    pub fn load(path: Option<&Path>) -> Result<(Self, ConfigSource), ConfigError> {
        let (config, source) = load_file::<Self>(path, DEFAULT_SERVER_CONFIG)?;
        config.server.validate()?;
        Ok((config, source))
    }
}

impl ClientConfig {
    /// Loads the client config from `path`, or from `client.toml` if absent.
    pub fn load(path: Option<&Path>) -> Result<(Self, ConfigSource), ConfigError> {
        let (config, source) = load_file::<Self>(path, DEFAULT_CLIENT_CONFIG)?;
        config.client.validate()?;
        Ok((config, source))
    }
}

/// Reads and parses a TOML file.
///
/// An explicitly requested file must exist; a missing default file falls
/// back to built-in values.
fn load_file<T>(path: Option<&Path>, default_path: &str) -> Result<(T, ConfigSource), ConfigError>
where
    T: DeserializeOwned + Default,
{
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(default_path), false),
    };

    if !explicit && !path.exists() {
        return Ok((T::default(), ConfigSource::Defaults(path)));
    }

    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::FileRead {
        path: path.clone(),
        source,
    })?;
    let config = toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
        path: path.clone(),
        source,
    })?;

    Ok((config, ConfigSource::File(path)))
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
