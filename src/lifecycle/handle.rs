//! Persisted record of the background relay

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::format_bind_addr;
use crate::error::{RelayError, Result};
use crate::lifecycle::process::ProcessProbe;
use crate::proxy::rotation::SelectionPolicy;

/// Identity of a running background relay, stored as JSON in the state directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHandle {
    pub pid: u32,
    pub host: String,
    pub port: u16,
    pub selection: SelectionPolicy,
    pub started_at: DateTime<Utc>,
}

impl ServerHandle {
    pub fn new(pid: u32, host: impl Into<String>, port: u16, selection: SelectionPolicy) -> Self {
        Self {
            pid,
            host: host.into(),
            port,
            selection,
            started_at: Utc::now(),
        }
    }

    /// Address the relay is bound to
    pub fn addr(&self) -> String {
        format_bind_addr(&self.host, self.port)
    }

    /// Persist the handle; readers never observe a partially written file
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("pid.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;

        debug!("Wrote server handle for pid {} to {}", self.pid, path.display());
        Ok(())
    }

    /// Read the handle; `None` if no relay has been started
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| RelayError::CorruptHandle {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Delete the handle file; returns whether one existed
    pub fn remove(path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Return the handle if its process is alive, removing it otherwise
    pub fn reap_if_dead(path: &Path, probe: &dyn ProcessProbe) -> Result<Option<Self>> {
        match Self::read(path)? {
            Some(handle) if probe.is_alive(handle.pid) => Ok(Some(handle)),
            Some(handle) => {
                info!("Removing stale server handle for pid {}", handle.pid);
                Self::remove(path)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
