use crate::daemon::control::ControlError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EdenError {
    /// Caller-supplied input was invalid (duplicate name, bad revision id, ...)
    #[error("{0}")]
    Usage(String),

    #[error("{0}")]
    NotFound(String),

    /// A file or field required by an on-disk invariant is missing or malformed
    #[error("{0}")]
    StateCorruption(String),

    #[error("{0}")]
    Transport(#[from] ControlError),

    #[error("{0}")]
    Startup(String),

    #[error("{path}: directory is not empty")]
    DirectoryNotEmpty { path: PathBuf },

    #[error("{path}: not a directory")]
    NotADirectory { path: PathBuf },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Coarse classification of [`EdenError`], for callers that branch on the
/// category rather than the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Usage,
    NotFound,
    StateCorruption,
    Transport,
    Startup,
    Io,
}

impl EdenError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Usage(_) | Self::DirectoryNotEmpty { .. } | Self::NotADirectory { .. } => {
                ErrorKind::Usage
            }
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::StateCorruption(_) | Self::Json { .. } => ErrorKind::StateCorruption,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Startup(_) => ErrorKind::Startup,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Attaches a human-readable context to `std::io::Result`s, in the spirit of
/// `anyhow::Context` but producing a typed [`EdenError::Io`].
pub(crate) trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| EdenError::io(f(), e))
    }
}

pub type Result<T> = std::result::Result<T, EdenError>;
