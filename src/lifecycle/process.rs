//! Process liveness and termination

use sysinfo::{Pid, ProcessStatus, Signal, System};
use tracing::debug;

/// Answers questions about other processes by pid
pub trait ProcessProbe: Send + Sync {
    /// Whether the process exists and has not exited; zombies count as exited
    fn is_alive(&self, pid: u32) -> bool;

    /// Ask the process to terminate; returns whether the signal was delivered
    fn terminate(&self, pid: u32) -> bool;
}

/// Probe backed by the operating system's process table
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProbe;

impl SysinfoProbe {
    fn snapshot(pid: Pid) -> System {
        let mut system = System::new();
        system.refresh_process(pid);
        system
    }
}

impl ProcessProbe for SysinfoProbe {
    fn is_alive(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let system = Self::snapshot(pid);

        match system.process(pid) {
            Some(process) => process.status() != ProcessStatus::Zombie,
            None => false,
        }
    }

    fn terminate(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let system = Self::snapshot(pid);

        let Some(process) = system.process(pid) else {
            return false;
        };

        // SIGTERM where supported, the platform's kill otherwise
        let delivered = process
            .kill_with(Signal::Term)
            .unwrap_or_else(|| process.kill());
        debug!("Sent termination to pid {}: {}", pid, delivered);
        delivered
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// In-memory process table
    #[derive(Default)]
    pub(crate) struct FakeProbe {
        alive: Mutex<HashSet<u32>>,
        pub(crate) terminated: Mutex<Vec<u32>>,
        /// Processes that ignore termination
        stubborn: bool,
    }

    impl FakeProbe {
        pub(crate) fn with_alive(pids: &[u32]) -> Self {
            Self {
                alive: Mutex::new(pids.iter().copied().collect()),
                ..Self::default()
            }
        }

        pub(crate) fn stubborn(pids: &[u32]) -> Self {
            Self {
                stubborn: true,
                ..Self::with_alive(pids)
            }
        }
    }

    impl ProcessProbe for FakeProbe {
        fn is_alive(&self, pid: u32) -> bool {
            self.alive.lock().contains(&pid)
        }

        fn terminate(&self, pid: u32) -> bool {
            self.terminated.lock().push(pid);
            if self.stubborn {
                return self.alive.lock().contains(&pid);
            }
            self.alive.lock().remove(&pid)
        }
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(SysinfoProbe.is_alive(std::process::id()));
    }

    #[test]
    fn test_unknown_pid_is_dead() {
        // Above the default Linux pid_max, so never allocated
        assert!(!SysinfoProbe.is_alive(4_194_304 + 17));
        assert!(!SysinfoProbe.terminate(4_194_304 + 17));
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_child_process() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id();

        assert!(SysinfoProbe.is_alive(pid));
        assert!(SysinfoProbe.terminate(pid));

        child.wait().unwrap();
        assert!(!SysinfoProbe.is_alive(pid));
    }
}
