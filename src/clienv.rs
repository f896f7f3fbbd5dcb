use std::path::PathBuf;

#[derive(Debug, Clone, Copy)]
pub enum EnvVar {
    EdenConfigDir,
    EdenEtcDir,
    EdenDaemonBinary,
    EdenLog,
    Home,
    User,
}

impl EnvVar {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EdenConfigDir => "EDEN_CONFIG_DIR",
            Self::EdenEtcDir => "EDEN_ETC_DIR",
            Self::EdenDaemonBinary => "EDEN_DAEMON_BINARY",
            Self::EdenLog => "EDEN_LOG",
            Self::Home => "HOME",
            Self::User => "USER",
        }
    }
}

pub const DEFAULT_ETC_EDEN_DIR: &str = "/etc/eden";
const DEFAULT_STATE_SUBDIR: &str = "local/.eden";
const FALLBACK_HOME: &str = "/";
const DEFAULT_DAEMON_BINARY: &str = "/usr/local/libexec/eden/edenfs";
const DEFAULT_LOG_FILTER: &str = "warn";

/// Non-empty value of an environment variable.
pub fn env_opt(var: EnvVar) -> Option<String> {
    std::env::var(var.as_str()).ok().filter(|v| !v.is_empty())
}

/// User home directory ($HOME, falling back to the passwd entry)
pub fn home_dir() -> PathBuf {
    let dir = env_opt(EnvVar::Home)
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from(FALLBACK_HOME));
    tracing::trace!(dir = %dir.display(), "Resolved home directory");
    dir
}

/// Login name ($USER)
pub fn user_name() -> Option<String> {
    let user = env_opt(EnvVar::User);
    tracing::trace!(value = ?user, "USER env var");
    user
}

/// Eden state directory ($EDEN_CONFIG_DIR or ~/local/.eden)
pub fn config_dir(home: &std::path::Path) -> PathBuf {
    let dir = env_opt(EnvVar::EdenConfigDir)
        .map(PathBuf::from)
        .unwrap_or_else(|| home.join(DEFAULT_STATE_SUBDIR));
    tracing::trace!(dir = %dir.display(), "Resolved eden state directory");
    dir
}

/// System config directory ($EDEN_ETC_DIR or /etc/eden)
pub fn etc_eden_dir() -> PathBuf {
    let dir = env_opt(EnvVar::EdenEtcDir)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ETC_EDEN_DIR));
    tracing::trace!(dir = %dir.display(), "Resolved system config directory");
    dir
}

/// edenfs binary ($EDEN_DAEMON_BINARY or the installed location)
pub fn daemon_binary() -> PathBuf {
    let path = env_opt(EnvVar::EdenDaemonBinary)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DAEMON_BINARY));
    tracing::trace!(path = %path.display(), "Daemon binary");
    path
}

/// Log filter directive for the CLI itself ($EDEN_LOG or "warn")
pub fn log_filter() -> String {
    env_opt(EnvVar::EdenLog).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}
