use crate::error::{RelayError, Result};
use crate::proxy::forwarder::InvocationConvention;
use crate::proxy::rotation::SelectionPolicy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// File name of the persisted server handle inside the state directory
pub const HANDLE_FILE_NAME: &str = "rota-relay.pid";

/// File name the background relay appends its log output to
pub const LOG_FILE_NAME: &str = "rota-relay.log";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay server configuration
    pub relay: RelayServerConfig,
    /// Endpoint pool sources
    pub pool: PoolConfig,
    /// Where lifecycle state lives
    pub state: StateConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    /// Host to bind to (default: 127.0.0.1)
    pub host: String,
    /// Port for the relay (default: 8080)
    pub port: u16,
    /// Endpoint selection policy
    pub selection: SelectionPolicy,
    /// How the target is embedded into the endpoint URL
    pub convention: InvocationConvention,
    /// Connect timeout for outbound calls
    pub connect_timeout: Duration,
    /// Total timeout for outbound calls
    pub request_timeout: Duration,
    /// Optional forward/egress proxy for dialing endpoints
    pub egress_proxy: Option<Url>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// JSON pool file (default: endpoints.json)
    pub endpoints_file: PathBuf,
    /// Endpoints given inline (RELAY_ENDPOINTS or --endpoint)
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateConfig {
    /// Directory holding the handle and log files (default: .)
    pub dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            relay: RelayServerConfig {
                host: get_env_or("RELAY_HOST", "127.0.0.1"),
                port: get_env_or("RELAY_PORT", "8080").parse().map_err(|_| {
                    RelayError::InvalidConfig("RELAY_PORT must be a valid port number".into())
                })?,
                selection: get_env_or("RELAY_SELECTION", "random").parse()?,
                convention: get_env_or("RELAY_CONVENTION", "path").parse()?,
                connect_timeout: parse_secs("RELAY_CONNECT_TIMEOUT", "10")?,
                request_timeout: parse_secs("RELAY_REQUEST_TIMEOUT", "30")?,
                egress_proxy: parse_egress_proxy(&get_env_or("RELAY_EGRESS_PROXY", ""))?,
            },
            pool: PoolConfig {
                endpoints_file: PathBuf::from(get_env_or("RELAY_ENDPOINTS_FILE", "endpoints.json")),
                endpoints: get_env_or("RELAY_ENDPOINTS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            state: StateConfig {
                dir: PathBuf::from(get_env_or("RELAY_STATE_DIR", ".")),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the relay bind address
    pub fn relay_addr(&self) -> String {
        format_bind_addr(&self.relay.host, self.relay.port)
    }
}

impl StateConfig {
    /// Path of the persisted server handle
    pub fn handle_path(&self) -> PathBuf {
        self.dir.join(HANDLE_FILE_NAME)
    }

    /// Path the background relay writes its logs to
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE_NAME)
    }
}

/// Format a host/port pair, bracketing bare IPv6 literals
pub fn format_bind_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Parse a timeout given in (possibly fractional) seconds
pub fn parse_timeout_secs(name: &str, raw: &str) -> Result<Duration> {
    let secs: f64 = raw.trim().parse().map_err(|_| {
        RelayError::InvalidConfig(format!("{} must be a number of seconds", name))
    })?;
    if secs <= 0.0 {
        return Err(RelayError::InvalidConfig(format!(
            "{} must be greater than zero",
            name
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|_| RelayError::InvalidConfig(format!("{} is out of range", name)))
}

fn parse_secs(key: &str, default: &str) -> Result<Duration> {
    parse_timeout_secs(key, &get_env_or(key, default))
}

/// Validate an egress proxy URL; an empty value disables it
pub fn parse_egress_proxy(raw: &str) -> Result<Option<Url>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let url = Url::parse(raw).map_err(|e| {
        RelayError::InvalidConfig(format!("RELAY_EGRESS_PROXY must be a valid URL: {}", e))
    })?;

    // Reject URLs that carry request-specific components.
    if url.fragment().is_some() || url.query().is_some() {
        return Err(RelayError::InvalidConfig(
            "RELAY_EGRESS_PROXY must not include query/fragment".into(),
        ));
    }
    if !(url.path().is_empty() || url.path() == "/") {
        return Err(RelayError::InvalidConfig(
            "RELAY_EGRESS_PROXY must not include a path".into(),
        ));
    }

    match url.scheme() {
        "http" | "https" | "socks5" | "socks5h" => {}
        other => {
            return Err(RelayError::InvalidConfig(format!(
                "RELAY_EGRESS_PROXY has unsupported scheme: {}",
                other
            )))
        }
    }

    if url.host_str().is_none() {
        return Err(RelayError::InvalidConfig(
            "RELAY_EGRESS_PROXY must include a host".into(),
        ));
    }

    Ok(Some(url))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
