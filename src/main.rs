//! Rota Relay - Entry Point
//!
//! Dispatches the `serve`, `serve-stop`, `serve-status` and `check` commands.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rota_relay::cli::{CheckArgs, Cli, Command, ServeArgs};
use rota_relay::config::{Config, LogConfig};
use rota_relay::error::RelayError;
use rota_relay::lifecycle::{self, Launch, LifecycleManager};
use rota_relay::models::load_pool;
use rota_relay::proxy::forwarder::{Forwarder, ForwarderConfig};
use rota_relay::proxy::health::EndpointProber;
use rota_relay::proxy::target::ResolvedTarget;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::from_env()?;
    init_tracing(&config.log);

    match cli.command {
        Command::Serve(args) => serve(config, args).await,
        Command::ServeStop => serve_stop(config).await,
        Command::ServeStatus => serve_status(config),
        Command::Check(args) => {
            args.apply(&mut config);
            check(config, args).await
        }
    }
}

/// Initialize tracing; output goes to stderr so stdout stays for command results
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("rota_relay={0},access={0}", log.level))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn serve(mut config: Config, args: ServeArgs) -> anyhow::Result<ExitCode> {
    args.apply(&mut config);

    if args.daemon && !args.foreground {
        let manager = LifecycleManager::new(config.state.clone());
        let launch = Launch {
            program: std::env::current_exe().context("failed to locate the relay executable")?,
            args: ServeArgs::foreground_args(&config),
            host: config.relay.host.clone(),
            port: config.relay.port,
            selection: config.relay.selection,
        };

        return match manager.start_background(&launch).await {
            Ok(handle) => {
                println!(
                    "Relay started in background (pid {}) on {}",
                    handle.pid,
                    handle.addr()
                );
                Ok(ExitCode::SUCCESS)
            }
            Err(e @ RelayError::AlreadyRunning { .. }) => {
                eprintln!("{}", e);
                Ok(ExitCode::FAILURE)
            }
            Err(e) => Err(e).context("failed to start relay"),
        };
    }

    info!("Starting Rota Relay on {}", config.relay_addr());
    lifecycle::run_foreground(config, args.foreground).await?;
    Ok(ExitCode::SUCCESS)
}

async fn serve_stop(config: Config) -> anyhow::Result<ExitCode> {
    let manager = LifecycleManager::new(config.state.clone());

    match manager.stop().await {
        Ok(outcome) => {
            println!("{}", outcome);
            Ok(ExitCode::SUCCESS)
        }
        Err(RelayError::NotRunning) => {
            println!("not running");
            Ok(ExitCode::FAILURE)
        }
        Err(e @ RelayError::CorruptHandle { .. }) => {
            eprintln!("{} (removed)", e);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context("failed to stop relay"),
    }
}

fn serve_status(config: Config) -> anyhow::Result<ExitCode> {
    let manager = LifecycleManager::new(config.state.clone());
    let status = manager.status().context("failed to read relay status")?;

    println!("{}", status);
    Ok(if status.is_running() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn check(config: Config, args: CheckArgs) -> anyhow::Result<ExitCode> {
    let endpoints = load_pool(&config.pool)?;
    if endpoints.is_empty() {
        error!(
            "No endpoints configured (checked --endpoint, RELAY_ENDPOINTS and {})",
            config.pool.endpoints_file.display()
        );
        return Ok(ExitCode::FAILURE);
    }

    let forwarder = Forwarder::new(ForwarderConfig {
        connect_timeout: config.relay.connect_timeout,
        request_timeout: config.relay.request_timeout,
        convention: config.relay.convention,
        egress_proxy: config.relay.egress_proxy.clone(),
    })?;
    let target = ResolvedTarget::parse(&args.url)?;
    let prober = EndpointProber::new(forwarder, target, args.method);

    let results = prober.probe_all(&endpoints).await;
    for result in &results {
        println!("{}", result);
    }

    let healthy = results.iter().filter(|r| r.success()).count();
    println!("{}/{} endpoints healthy", healthy, results.len());

    Ok(if healthy > 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
