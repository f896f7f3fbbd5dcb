//! The configuration root: every on-disk location the tool touches, derived
//! from three directories and threaded explicitly through each component.

use crate::clienv;
use std::path::{Path, PathBuf};

const CONFIG_DOT_D: &str = "config.d";
const USER_CONFIG: &str = ".edenrc";
const LOCK_FILE: &str = "lock";
const SOCKET: &str = "socket";
const CLIENTS_DIR: &str = "clients";
const CONFIG_JSON: &str = "config.json";
const ROCKS_DB_DIR: &str = "storage/rocks-db";

#[derive(Debug, Clone)]
pub struct EdenPaths {
    state_dir: PathBuf,
    etc_eden_dir: PathBuf,
    home_dir: PathBuf,
    user: Option<String>,
}

impl EdenPaths {
    pub fn new(
        state_dir: impl Into<PathBuf>,
        etc_eden_dir: impl Into<PathBuf>,
        home_dir: impl Into<PathBuf>,
        user: Option<String>,
    ) -> Self {
        Self {
            state_dir: state_dir.into(),
            etc_eden_dir: etc_eden_dir.into(),
            home_dir: home_dir.into(),
            user,
        }
    }

    /// Resolve each directory from the explicit override or the environment.
    pub fn resolve(
        state_dir: Option<PathBuf>,
        etc_eden_dir: Option<PathBuf>,
        home_dir: Option<PathBuf>,
    ) -> Self {
        let home_dir = home_dir.unwrap_or_else(clienv::home_dir);
        let state_dir = state_dir.unwrap_or_else(|| clienv::config_dir(&home_dir));
        let etc_eden_dir = etc_eden_dir.unwrap_or_else(clienv::etc_eden_dir);
        Self::new(state_dir, etc_eden_dir, home_dir, clienv::user_name())
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn etc_eden_dir(&self) -> &Path {
        &self.etc_eden_dir
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn config_d(&self) -> PathBuf {
        self.etc_eden_dir.join(CONFIG_DOT_D)
    }

    pub fn user_config(&self) -> PathBuf {
        self.home_dir.join(USER_CONFIG)
    }

    /// Lock file the running daemon writes its PID into.
    pub fn daemon_lock_file(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    pub fn control_socket(&self) -> PathBuf {
        self.state_dir.join(SOCKET)
    }

    pub fn clients_dir(&self) -> PathBuf {
        self.state_dir.join(CLIENTS_DIR)
    }

    pub fn mount_registry(&self) -> PathBuf {
        self.state_dir.join(CONFIG_JSON)
    }

    pub fn daemon_log(&self) -> PathBuf {
        self.state_dir.join("logs").join("edenfs.log")
    }

    pub fn rocks_db_dir(&self) -> PathBuf {
        self.state_dir.join(ROCKS_DB_DIR)
    }
}
