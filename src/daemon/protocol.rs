//! Control-channel message types.
//!
//! Each request is one JSON object on its own line; the daemon answers with
//! exactly one [`Response`] line.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Request from the CLI to the daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Request {
    /// Current lifecycle status
    GetStatus,
    /// PID of the daemon process
    GetPid,
    /// Mount a checkout backed by `client_path`
    #[serde(rename_all = "camelCase")]
    Mount {
        mount_point: PathBuf,
        client_path: PathBuf,
    },
    #[serde(rename_all = "camelCase")]
    Unmount { mount_point: PathBuf },
    /// Switch a mount to another revision (40 hex chars)
    #[serde(rename_all = "camelCase")]
    CheckOutRevision {
        mount_point: PathBuf,
        snapshot: String,
    },
    /// Begin a graceful shutdown; returns before the process exits
    InitiateShutdown { reason: String },
}

/// Reply from the daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum Response {
    Status { status: DaemonStatus },
    Pid { pid: u32 },
    Ok,
    Error { message: String },
}

/// Lifecycle status reported by the daemon itself
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DaemonStatus {
    Dead,
    Starting,
    Alive,
    Stopping,
    /// Process alive but not serving requests
    Stopped,
    Warning,
}

impl DaemonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonStatus::Dead => "DEAD",
            DaemonStatus::Starting => "STARTING",
            DaemonStatus::Alive => "ALIVE",
            DaemonStatus::Stopping => "STOPPING",
            DaemonStatus::Stopped => "STOPPED",
            DaemonStatus::Warning => "WARNING",
        }
    }
}

impl std::fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
