//! Drives the `rota-relay` binary through the background lifecycle

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_rota-relay");

struct Relay {
    state_dir: TempDir,
    port: u16,
}

impl Relay {
    fn new() -> Self {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        Self {
            state_dir: TempDir::new().unwrap(),
            port,
        }
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(BIN)
            .args(args)
            .current_dir(self.state_dir.path())
            .env("RELAY_STATE_DIR", self.state_dir.path())
            .env("RELAY_ENDPOINTS_FILE", self.path("endpoints.json"))
            .env_remove("RELAY_ENDPOINTS")
            .env_remove("RUST_LOG")
            .output()
            .unwrap()
    }

    fn start(&self) -> Output {
        let port = self.port.to_string();
        self.run(&[
            "serve",
            "--daemon",
            "--port",
            &port,
            "--selection",
            "roundrobin",
            "--endpoint",
            "https://w1.example",
        ])
    }

    fn path(&self, name: &str) -> PathBuf {
        self.state_dir.path().join(name)
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        // Never leave a daemon behind, even when an assertion failed
        let _ = self.run(&["serve-stop"]);
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn handle_pid(path: &Path) -> u64 {
    let raw = std::fs::read_to_string(path).unwrap();
    let handle: serde_json::Value = serde_json::from_str(&raw).unwrap();
    handle["pid"].as_u64().unwrap()
}

#[test]
fn daemon_start_status_stop() {
    let relay = Relay::new();

    let started = relay.start();
    assert!(
        started.status.success(),
        "start failed: {}",
        String::from_utf8_lossy(&started.stderr)
    );
    assert!(stdout(&started).contains("pid"));

    let handle_path = relay.path("rota-relay.pid");
    let pid = handle_pid(&handle_path);

    let status = relay.run(&["serve-status"]);
    assert!(status.status.success());
    let line = stdout(&status);
    assert!(line.starts_with(&format!("running pid={}", pid)), "{}", line);
    assert!(line.contains(&format!("addr=127.0.0.1:{}", relay.port)));
    assert!(line.contains("selection=roundrobin"));

    // The daemon serves requests
    let mut stream = std::net::TcpStream::connect(("127.0.0.1", relay.port)).unwrap();
    std::io::Write::write_all(
        &mut stream,
        b"GET /not-a-url HTTP/1.1\r\nHost: relay\r\nConnection: close\r\n\r\n",
    )
    .unwrap();
    let mut response = String::new();
    std::io::Read::read_to_string(&mut stream, &mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 400"), "{}", response);

    let again = relay.start();
    assert!(!again.status.success());
    assert!(String::from_utf8_lossy(&again.stderr).contains("already running"));

    let stopped = relay.run(&["serve-stop"]);
    assert!(stopped.status.success());
    assert!(stdout(&stopped).starts_with("stopped"));
    assert!(!handle_path.exists());

    let status = relay.run(&["serve-status"]);
    assert!(!status.status.success());
    assert_eq!(stdout(&status), "stopped");

    assert!(relay.path("rota-relay.log").exists());
}

#[test]
fn stop_without_relay_reports_not_running() {
    let relay = Relay::new();

    let stopped = relay.run(&["serve-stop"]);

    assert_eq!(stopped.status.code(), Some(1));
    assert_eq!(stdout(&stopped), "not running");
}

#[test]
fn stale_handle_is_not_reported_as_running() {
    let relay = Relay::new();
    std::fs::write(
        relay.path("rota-relay.pid"),
        r#"{"pid": 4194321, "host": "127.0.0.1", "port": 8080, "selection": "random", "started_at": "2024-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    let status = relay.run(&["serve-status"]);
    let line = stdout(&status);
    assert!(line.starts_with("stopped"), "{}", line);
    assert!(!line.contains("running"));

    let stopped = relay.run(&["serve-stop"]);
    assert!(stopped.status.success());
    assert!(!relay.path("rota-relay.pid").exists());
}
