use super::protocol::DaemonStatus;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// Nothing is listening on the control channel
    #[error("edenfs is not running: {0}")]
    NotRunning(String),

    /// The daemon answered, or the exchange broke, with an error
    #[error("error talking to edenfs: {0}")]
    Remote(String),

    /// Connected, but no reply arrived in time
    #[error("edenfs is not responding: {0}")]
    Timeout(String),
}

pub type ControlResult<T> = std::result::Result<T, ControlError>;

/// Operations the running daemon exposes over its control channel.
#[async_trait]
pub trait EdenControl: Send + Sync {
    async fn get_status(&self) -> ControlResult<DaemonStatus>;

    async fn get_pid(&self) -> ControlResult<u32>;

    async fn mount(&self, mount_point: &Path, client_path: &Path) -> ControlResult<()>;

    async fn unmount(&self, mount_point: &Path) -> ControlResult<()>;

    async fn check_out_revision(&self, mount_point: &Path, snapshot: &str) -> ControlResult<()>;

    async fn initiate_shutdown(&self, reason: &str) -> ControlResult<()>;
}
