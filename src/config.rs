//! Server configuration and command-line parsing.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::{DEFAULT_HOST, DEFAULT_PORT};

/// Default cap on concurrently served connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Largest accepted `--max-connections`; the server's semaphore holds no more
pub const MAX_CONNECTIONS: usize = Semaphore::MAX_PERMITS;

/// Default bound on how long shutdown waits for a session's pending writes
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default requested shard count
pub const DEFAULT_SHARDS: usize = 1024;

/// Errors from parsing the command line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid value '{value}' for {flag}")]
    InvalidValue { flag: String, value: String },

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start the server
    Run(Config),
    /// Print usage and exit
    Help,
    /// Print the version and exit
    Version,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Socket address to listen on, `host:port`
    pub address: String,
    /// Connections served at once; more are turned away
    pub max_connections: usize,
    /// Drain bound for each session at shutdown
    pub timeout: Duration,
    /// Requested shard count, rounded by the store
    pub shards: usize,
    /// Overrides `RUST_LOG` when set
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            timeout: DEFAULT_TIMEOUT,
            shards: DEFAULT_SHARDS,
            log_level: None,
        }
    }
}

impl Config {
    /// Parses command-line arguments, not including the program name.
    ///
    /// `--bind` wins over `--host`/`--port` when both are given.
    pub fn from_args<I, S>(args: I) -> Result<Action, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = Config::default();
        let mut host = DEFAULT_HOST.to_string();
        let mut port = DEFAULT_PORT;
        let mut bind = None;

        let mut args = args.into_iter().map(Into::into);
        while let Some(flag) = args.next() {
            match flag.as_str() {
                "--host" | "-h" => host = value_for(&flag, args.next())?,
                "--port" | "-p" => port = parse_value(&flag, args.next())?,
                "--bind" => bind = Some(value_for(&flag, args.next())?),
                "--max-connections" => {
                    config.max_connections = parse_value(&flag, args.next())?;
                    if config.max_connections == 0 || config.max_connections > MAX_CONNECTIONS {
                        return Err(invalid(&flag, &config.max_connections.to_string()));
                    }
                }
                "--timeout" => {
                    config.timeout = Duration::from_secs(parse_value(&flag, args.next())?);
                }
                "--shards" => {
                    config.shards = parse_value(&flag, args.next())?;
                    if config.shards == 0 {
                        return Err(invalid(&flag, "0"));
                    }
                }
                "--log-level" => config.log_level = Some(value_for(&flag, args.next())?),
                "--help" => return Ok(Action::Help),
                "--version" | "-v" => return Ok(Action::Version),
                _ => return Err(ConfigError::UnknownArgument(flag)),
            }
        }

        config.address = bind.unwrap_or_else(|| format!("{}:{}", host, port));
        Ok(Action::Run(config))
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> &str {
        &self.address
    }
}

fn value_for(flag: &str, value: Option<String>) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T, ConfigError> {
    let value = value_for(flag, value)?;
    value.parse().map_err(|_| invalid(flag, &value))
}

fn invalid(flag: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
    }
}
