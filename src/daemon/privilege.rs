use super::environment::DaemonEnv;
use crate::error::{IoContext, Result};
use nix::unistd::geteuid;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::debug;

const SUDO: &str = "/usr/bin/sudo";

/// The daemon needs root. Escalate unless we already are root or the binary
/// is setuid-root.
pub fn needs_escalation(daemon_binary: &Path) -> Result<bool> {
    if geteuid().is_root() {
        return Ok(false);
    }
    let meta = std::fs::metadata(daemon_binary)
        .io_context(|| format!("failed to stat daemon binary {}", daemon_binary.display()))?;
    let setuid_root = meta.uid() == 0 && (meta.mode() & libc::S_ISUID as u32) != 0;
    debug!(binary = %daemon_binary.display(), setuid_root, "Checked daemon binary privileges");
    Ok(!setuid_root)
}

/// `sudo KEY=VALUE... <cmd>`. Depending on the sudoers policy the environment
/// is not always propagated, even with `-E`, so it is spelled out.
pub fn wrap_with_sudo(cmd: Vec<String>, env: &DaemonEnv) -> Vec<String> {
    let mut wrapped = Vec::with_capacity(1 + env.len() + cmd.len());
    wrapped.push(SUDO.to_string());
    wrapped.extend(env.iter().map(|(k, v)| format!("{k}={v}")));
    wrapped.extend(cmd);
    wrapped
}
