//! Background process lifecycle
//!
//! A background relay is the current executable re-launched as
//! `serve --foreground` in its own process group. The launching process waits
//! until the port accepts connections, then records a [`ServerHandle`] in the
//! state directory; `stop` and `status` work from that handle alone.

pub mod handle;
pub mod process;

pub use handle::ServerHandle;
pub use process::{ProcessProbe, SysinfoProbe};

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::signal;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::config::{format_bind_addr, Config, PoolConfig, StateConfig};
use crate::error::{RelayError, Result};
use crate::models::load_pool;
use crate::proxy::rotation::{create_selector, EndpointSelector, SelectionPolicy};
use crate::proxy::server::RelayServer;

/// How long a freshly spawned relay has to start accepting connections
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a terminated relay has to exit
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What `status` found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Running(ServerHandle),
    /// Handle names a process that is gone
    Stale(ServerHandle),
    Stopped,
}

impl ServerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ServerStatus::Running(_))
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStatus::Running(handle) => write!(
                f,
                "running pid={} addr={} selection={} since={}",
                handle.pid,
                handle.addr(),
                handle.selection,
                handle.started_at.to_rfc3339()
            ),
            ServerStatus::Stale(handle) => {
                write!(f, "stopped (stale handle for pid {})", handle.pid)
            }
            ServerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// What `stop` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped(ServerHandle),
    StaleRemoved(ServerHandle),
}

impl std::fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopOutcome::Stopped(handle) => write!(f, "stopped (pid {})", handle.pid),
            StopOutcome::StaleRemoved(handle) => {
                write!(f, "stopped (removed stale handle for pid {})", handle.pid)
            }
        }
    }
}

/// How to launch the background relay
#[derive(Debug, Clone)]
pub struct Launch {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub host: String,
    pub port: u16,
    pub selection: SelectionPolicy,
}

/// Starts, stops and inspects the background relay
pub struct LifecycleManager {
    state: StateConfig,
    probe: Arc<dyn ProcessProbe>,
}

impl LifecycleManager {
    pub fn new(state: StateConfig) -> Self {
        Self::with_probe(state, Arc::new(SysinfoProbe))
    }

    pub fn with_probe(state: StateConfig, probe: Arc<dyn ProcessProbe>) -> Self {
        Self { state, probe }
    }

    pub fn state(&self) -> &StateConfig {
        &self.state
    }

    /// Spawn the relay in the background and wait until it accepts connections
    pub async fn start_background(&self, launch: &Launch) -> Result<ServerHandle> {
        let handle_path = self.state.handle_path();

        match ServerHandle::reap_if_dead(&handle_path, self.probe.as_ref()) {
            Ok(Some(existing)) => return Err(RelayError::AlreadyRunning { pid: existing.pid }),
            Ok(None) => {}
            Err(e @ RelayError::CorruptHandle { .. }) => {
                warn!("{}; removing it", e);
                ServerHandle::remove(&handle_path)?;
            }
            Err(e) => return Err(e),
        }

        let ready_addr = format_bind_addr(connect_host(&launch.host), launch.port);
        if TcpStream::connect(&ready_addr).await.is_ok() {
            return Err(RelayError::Lifecycle(format!(
                "{} is already in use",
                ready_addr
            )));
        }

        std::fs::create_dir_all(&self.state.dir)?;
        let log_path = self.state.log_path();
        let log = OpenOptions::new().create(true).append(true).open(&log_path)?;

        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log));
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            RelayError::Lifecycle(format!(
                "failed to launch {}: {}",
                launch.program.display(),
                e
            ))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| RelayError::Lifecycle("relay exited before it could be tracked".into()))?;

        wait_until_ready(&mut child, &ready_addr, &log_path).await?;

        let handle = ServerHandle::new(pid, launch.host.clone(), launch.port, launch.selection);
        handle.write(&handle_path)?;
        info!(pid = pid, addr = %handle.addr(), "Relay started in background");

        Ok(handle)
    }

    /// Terminate the background relay and remove its handle
    pub async fn stop(&self) -> Result<StopOutcome> {
        let handle_path = self.state.handle_path();

        let handle = match ServerHandle::read(&handle_path) {
            Ok(Some(handle)) => handle,
            Ok(None) => return Err(RelayError::NotRunning),
            Err(e @ RelayError::CorruptHandle { .. }) => {
                ServerHandle::remove(&handle_path)?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if !self.probe.is_alive(handle.pid) {
            ServerHandle::remove(&handle_path)?;
            return Ok(StopOutcome::StaleRemoved(handle));
        }

        if !self.probe.terminate(handle.pid) {
            warn!("Failed to signal pid {}", handle.pid);
        }

        let deadline = Instant::now() + STOP_TIMEOUT;
        while self.probe.is_alive(handle.pid) {
            if Instant::now() >= deadline {
                warn!(
                    "pid {} still alive {}s after termination",
                    handle.pid,
                    STOP_TIMEOUT.as_secs()
                );
                break;
            }
            sleep(POLL_INTERVAL).await;
        }

        ServerHandle::remove(&handle_path)?;
        info!(pid = handle.pid, "Relay stopped");

        Ok(StopOutcome::Stopped(handle))
    }

    /// Report whether the background relay is running
    pub fn status(&self) -> Result<ServerStatus> {
        Ok(match ServerHandle::read(&self.state.handle_path())? {
            Some(handle) if self.probe.is_alive(handle.pid) => ServerStatus::Running(handle),
            Some(handle) => ServerStatus::Stale(handle),
            None => ServerStatus::Stopped,
        })
    }

    /// Remove the handle if it names `pid`
    pub fn release(&self, pid: u32) -> Result<()> {
        let handle_path = self.state.handle_path();
        if let Ok(Some(handle)) = ServerHandle::read(&handle_path) {
            if handle.pid == pid {
                ServerHandle::remove(&handle_path)?;
            }
        }
        Ok(())
    }
}

/// Address a local client can reach a relay bound to `host` on
fn connect_host(host: &str) -> &str {
    match host {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" | "[::]" => "::1",
        other => other,
    }
}

async fn wait_until_ready(child: &mut Child, addr: &str, log_path: &Path) -> Result<()> {
    let deadline = Instant::now() + STARTUP_TIMEOUT;

    loop {
        if let Some(status) = child.try_wait()? {
            return Err(RelayError::Lifecycle(format!(
                "relay exited during startup ({}), see {}",
                status,
                log_path.display()
            )));
        }

        if TcpStream::connect(addr).await.is_ok() {
            return Ok(());
        }

        if Instant::now() >= deadline {
            let _ = child.start_kill();
            return Err(RelayError::Lifecycle(format!(
                "relay did not accept connections on {} within {}s, see {}",
                addr,
                STARTUP_TIMEOUT.as_secs(),
                log_path.display()
            )));
        }

        sleep(POLL_INTERVAL).await;
    }
}

/// Run the relay in this process until SIGINT/SIGTERM
///
/// SIGHUP reloads the endpoint pool. When `owns_handle` is set the handle file
/// is removed on exit if it still names this process.
pub async fn run_foreground(config: Config, owns_handle: bool) -> Result<()> {
    let selector: Arc<dyn EndpointSelector> = Arc::from(create_selector(config.relay.selection));
    let endpoints = load_pool(&config.pool)?;
    if endpoints.is_empty() {
        warn!("Endpoint pool is empty; requests will fail until endpoints are added");
    }
    selector.refresh(endpoints).await?;
    info!(
        "Loaded {} endpoints, selection policy: {}",
        selector.available_count(),
        selector.policy_name()
    );

    let server = RelayServer::new(config.relay.clone(), selector.clone())?;
    let listener = server.bind().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(async move { server.serve(listener, shutdown_rx).await });
    let reload_task = tokio::spawn(reload_on_hangup(config.pool.clone(), selector));

    shutdown_signal().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    reload_task.abort();
    let served = server_task
        .await
        .map_err(|e| RelayError::Lifecycle(format!("server task failed: {}", e)))?;

    if owns_handle {
        LifecycleManager::new(config.state.clone()).release(std::process::id())?;
    }

    info!("Relay stopped");
    served
}

/// Reload the endpoint pool every time SIGHUP arrives
#[cfg(unix)]
async fn reload_on_hangup(pool: PoolConfig, selector: Arc<dyn EndpointSelector>) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            error!("Failed to install SIGHUP handler: {}", e);
            return;
        }
    };

    while hangup.recv().await.is_some() {
        match reload_pool(&pool, selector.as_ref()).await {
            Ok(count) => info!("Reloaded endpoint pool: {} endpoints", count),
            Err(e) => error!("Endpoint pool reload failed, keeping previous pool: {}", e),
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_pool: PoolConfig, _selector: Arc<dyn EndpointSelector>) {}

/// Re-read every pool source into `selector`
pub async fn reload_pool(pool: &PoolConfig, selector: &dyn EndpointSelector) -> Result<usize> {
    let endpoints = load_pool(pool)?;
    let count = endpoints.len();
    selector.refresh(endpoints).await?;
    Ok(count)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result?,
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c().await?;

    Ok(())
}
