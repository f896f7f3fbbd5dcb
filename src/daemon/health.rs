use super::control::{ControlError, EdenControl};
use super::process::ProcessTable;
use super::protocol::DaemonStatus;
use crate::error::{EdenError, Result};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Command name the daemon process runs under.
pub const DAEMON_PROCESS_NAME: &str = "edenfs";

/// Health verdict for the daemon, recomputed on every check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: DaemonStatus,
    /// Process id, when one is known
    pub pid: Option<u32>,
    /// Human-readable explanation
    pub detail: String,
}

impl HealthStatus {
    pub fn dead() -> Self {
        Self {
            status: DaemonStatus::Dead,
            pid: None,
            detail: "edenfs not running".to_string(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == DaemonStatus::Alive
    }
}

/// Works out whether the daemon is up, asking it directly when possible and
/// otherwise inferring from its lock file and the process table.
pub struct HealthOracle<C, P> {
    control: C,
    processes: P,
    lock_file: PathBuf,
}

impl<C: EdenControl, P: ProcessTable> HealthOracle<C, P> {
    pub fn new(control: C, processes: P, lock_file: impl Into<PathBuf>) -> Self {
        Self {
            control,
            processes,
            lock_file: lock_file.into(),
        }
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    pub fn processes(&self) -> &P {
        &self.processes
    }

    /// Errors only when the control channel answered with something other
    /// than "unreachable"; that is a failed query, not a dead daemon.
    pub async fn check(&self) -> Result<HealthStatus> {
        let queried = async {
            let pid = self.control.get_pid().await?;
            let status = self.control.get_status().await?;
            Ok::<_, ControlError>((pid, status))
        };

        match queried.await {
            Ok((pid, status)) => Ok(HealthStatus {
                status,
                pid: Some(pid),
                detail: format!("edenfs running (pid {pid}); status is {status}"),
            }),
            Err(ControlError::NotRunning(reason)) => {
                debug!(%reason, "Control channel unreachable, falling back to lock file");
                Ok(self.check_using_lock_file())
            }
            Err(e) => Err(EdenError::Transport(e)),
        }
    }

    /// Best-effort verdict from the PID in the daemon's lock file.
    pub(crate) fn check_using_lock_file(&self) -> HealthStatus {
        let pid = match fs::read_to_string(&self.lock_file) {
            Ok(contents) => match contents.trim().parse::<u32>() {
                Ok(pid) => pid,
                Err(_) => {
                    debug!(contents = %contents.trim(), "Lock file does not hold a PID");
                    return HealthStatus::dead();
                }
            },
            Err(e) => {
                debug!(lock = %self.lock_file.display(), "Cannot read lock file: {}", e);
                return HealthStatus::dead();
            }
        };

        // The PID may have been recycled by an unrelated process.
        match self.processes.command_name(pid) {
            Some(name) if name == DAEMON_PROCESS_NAME => {
                warn!(pid, "edenfs process alive but control channel is down");
                HealthStatus {
                    status: DaemonStatus::Stopped,
                    pid: Some(pid),
                    detail: format!(
                        "Eden's control server does not appear to be running, \
                         but the process is still alive (PID={pid})."
                    ),
                }
            }
            Some(name) => {
                debug!(pid, %name, "Lock file PID belongs to another process");
                HealthStatus::dead()
            }
            None => HealthStatus::dead(),
        }
    }
}
