use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::{Command, Stdio};

/// View of the OS process table.
pub trait ProcessTable: Send + Sync {
    /// Command name of `pid`, or `None` when no such process exists.
    fn command_name(&self, pid: u32) -> Option<String>;

    fn is_running(&self, pid: u32) -> bool;

    fn kill(&self, pid: u32) -> std::io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn command_name(&self, pid: u32) -> Option<String> {
        let output = Command::new("ps")
            .args(["-p", &pid.to_string(), "-o", "comm="])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let comm = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if comm.is_empty() {
            return None;
        }
        // `comm` may be a bare name or a path depending on the platform.
        let name = Path::new(&comm)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(comm);
        Some(name)
    }

    fn is_running(&self, pid: u32) -> bool {
        let Some(pid) = target_pid(pid) else {
            return false;
        };
        match kill(pid, None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn kill(&self, pid: u32) -> std::io::Result<()> {
        let pid = target_pid(pid).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a single process id")
        })?;
        kill(pid, Signal::SIGKILL).map_err(std::io::Error::from)
    }
}

/// Pid for a single process; `kill(2)` treats 0 and negative pids as
/// process groups.
fn target_pid(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}
