use super::control::{ControlError, ControlResult, EdenControl};
use super::protocol::{DaemonStatus, Request, Response};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, trace, warn};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Control-channel client speaking line-delimited JSON over the daemon's
/// Unix socket. One connection per request.
#[derive(Debug, Clone)]
pub struct SocketClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl SocketClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Upper bound on one whole request, connect through reply.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn call(&self, request: Request) -> ControlResult<Response> {
        match tokio::time::timeout(self.timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(socket = %self.socket_path.display(), "No reply from edenfs within {:?}", self.timeout);
                Err(ControlError::Timeout(format!(
                    "no reply on {} within {:?}",
                    self.socket_path.display(),
                    self.timeout
                )))
            }
        }
    }

    async fn exchange(&self, request: Request) -> ControlResult<Response> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            debug!(socket = %self.socket_path.display(), "Control socket unreachable: {}", e);
            ControlError::NotRunning(format!("{}: {}", self.socket_path.display(), e))
        })?;

        let mut line = serde_json::to_string(&request)
            .map_err(|e| ControlError::Remote(format!("failed to encode request: {e}")))?;
        line.push('\n');
        trace!(request = %line.trim_end(), "Sending control request");

        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ControlError::Remote(e.to_string()))?;
        writer
            .shutdown()
            .await
            .map_err(|e| ControlError::Remote(e.to_string()))?;

        let mut reply = String::new();
        BufReader::new(reader)
            .read_line(&mut reply)
            .await
            .map_err(|e| ControlError::Remote(e.to_string()))?;
        if reply.is_empty() {
            return Err(ControlError::Remote("connection closed without a reply".into()));
        }

        match serde_json::from_str(&reply) {
            Ok(Response::Error { message }) => Err(ControlError::Remote(message)),
            Ok(response) => Ok(response),
            Err(e) => Err(ControlError::Remote(format!("malformed reply: {e}"))),
        }
    }

    async fn call_ok(&self, request: Request) -> ControlResult<()> {
        match self.call(request).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Response) -> ControlError {
    ControlError::Remote(format!("unexpected reply: {response:?}"))
}

#[async_trait]
impl EdenControl for SocketClient {
    async fn get_status(&self) -> ControlResult<DaemonStatus> {
        match self.call(Request::GetStatus).await? {
            Response::Status { status } => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    async fn get_pid(&self) -> ControlResult<u32> {
        match self.call(Request::GetPid).await? {
            Response::Pid { pid } => Ok(pid),
            other => Err(unexpected(other)),
        }
    }

    async fn mount(&self, mount_point: &Path, client_path: &Path) -> ControlResult<()> {
        self.call_ok(Request::Mount {
            mount_point: mount_point.to_path_buf(),
            client_path: client_path.to_path_buf(),
        })
        .await
    }

    async fn unmount(&self, mount_point: &Path) -> ControlResult<()> {
        self.call_ok(Request::Unmount {
            mount_point: mount_point.to_path_buf(),
        })
        .await
    }

    async fn check_out_revision(&self, mount_point: &Path, snapshot: &str) -> ControlResult<()> {
        self.call_ok(Request::CheckOutRevision {
            mount_point: mount_point.to_path_buf(),
            snapshot: snapshot.to_string(),
        })
        .await
    }

    async fn initiate_shutdown(&self, reason: &str) -> ControlResult<()> {
        self.call_ok(Request::InitiateShutdown {
            reason: reason.to_string(),
        })
        .await
    }
}
