//! Command-line interface
//!
//! Flags override the `RELAY_*` environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use hyper::Method;

use crate::config::{parse_timeout_secs, Config};
use crate::proxy::forwarder::InvocationConvention;
use crate::proxy::health::DEFAULT_CHECK_URL;
use crate::proxy::rotation::SelectionPolicy;

#[derive(Debug, Parser)]
#[command(name = "rota-relay", version, about = "IP-rotating HTTP relay over a pool of forwarding endpoints")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the relay server
    Serve(ServeArgs),
    /// Stop the background relay
    ServeStop,
    /// Show whether the background relay is running
    ServeStatus,
    /// Send a test request through every endpoint
    Check(CheckArgs),
}

/// Where the endpoint pool comes from
#[derive(Debug, Clone, Default, Args)]
pub struct PoolArgs {
    /// JSON file listing endpoint URLs
    #[arg(long, value_name = "PATH")]
    pub endpoints_file: Option<PathBuf>,

    /// Endpoint base URL (repeatable)
    #[arg(long = "endpoint", value_name = "URL")]
    pub endpoints: Vec<String>,
}

impl PoolArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.endpoints_file {
            config.pool.endpoints_file = path.clone();
        }
        if !self.endpoints.is_empty() {
            // Flags come first so they win de-duplication
            let mut endpoints = self.endpoints.clone();
            endpoints.append(&mut config.pool.endpoints);
            config.pool.endpoints = endpoints;
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind
    #[arg(long)]
    pub port: Option<u16>,

    /// Detach and run in the background
    #[arg(long)]
    pub daemon: bool,

    /// Endpoint selection policy (random or roundrobin)
    #[arg(long)]
    pub selection: Option<SelectionPolicy>,

    /// How the target is passed to endpoints (path or query)
    #[arg(long)]
    pub convention: Option<InvocationConvention>,

    /// Outbound request timeout in seconds
    #[arg(long, value_name = "SECS", value_parser = parse_secs_arg)]
    pub timeout: Option<Duration>,

    /// Outbound connect timeout in seconds
    #[arg(long, value_name = "SECS", value_parser = parse_secs_arg)]
    pub connect_timeout: Option<Duration>,

    #[command(flatten)]
    pub pool: PoolArgs,

    /// Set on the re-launched background process
    #[arg(long, hide = true)]
    pub foreground: bool,
}

impl ServeArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.relay.host = host.clone();
        }
        if let Some(port) = self.port {
            config.relay.port = port;
        }
        if let Some(selection) = self.selection {
            config.relay.selection = selection;
        }
        if let Some(convention) = self.convention {
            config.relay.convention = convention;
        }
        if let Some(timeout) = self.timeout {
            config.relay.request_timeout = timeout;
        }
        if let Some(timeout) = self.connect_timeout {
            config.relay.connect_timeout = timeout;
        }
        self.pool.apply(config);
    }

    /// Arguments that make a background process serve `config` in the foreground
    pub fn foreground_args(config: &Config) -> Vec<String> {
        let relay = &config.relay;
        let mut args = vec![
            "serve".to_string(),
            "--foreground".to_string(),
            "--host".to_string(),
            relay.host.clone(),
            "--port".to_string(),
            relay.port.to_string(),
            "--selection".to_string(),
            relay.selection.to_string(),
            "--convention".to_string(),
            relay.convention.to_string(),
            "--timeout".to_string(),
            relay.request_timeout.as_secs_f64().to_string(),
            "--connect-timeout".to_string(),
            relay.connect_timeout.as_secs_f64().to_string(),
            "--endpoints-file".to_string(),
            config.pool.endpoints_file.display().to_string(),
        ];
        for endpoint in &config.pool.endpoints {
            args.push("--endpoint".to_string());
            args.push(endpoint.clone());
        }
        args
    }
}

#[derive(Debug, Clone, Args)]
pub struct CheckArgs {
    /// Target every endpoint is asked to fetch
    #[arg(long, default_value = DEFAULT_CHECK_URL)]
    pub url: String,

    /// HTTP method of the probe
    #[arg(long, default_value = "GET")]
    pub method: Method,

    /// Probe request timeout in seconds
    #[arg(long, value_name = "SECS", value_parser = parse_secs_arg)]
    pub timeout: Option<Duration>,

    #[command(flatten)]
    pub pool: PoolArgs,
}

impl CheckArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(timeout) = self.timeout {
            config.relay.request_timeout = timeout;
        }
        self.pool.apply(config);
    }
}

fn parse_secs_arg(raw: &str) -> std::result::Result<Duration, String> {
    parse_timeout_secs("timeout", raw).map_err(|e| e.to_string())
}
