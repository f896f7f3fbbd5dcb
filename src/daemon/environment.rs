//! Minimal environment handed to the daemon, so every start sees the same
//! settings regardless of the invoking shell.

use std::collections::BTreeMap;

const SAFE_PATH: &[&str] = &["/usr/local/bin", "/bin", "/usr/bin"];

const PRESERVED: &[&str] = &[
    "USER",
    "LOGNAME",
    "HOME",
    "EMAIL",
    "NAME",
    // Fetching file contents may need to SSH to a remote server.
    "SSH_AUTH_SOCK",
    "SSH_AGENT_PID",
    "KRB5CCNAME",
];

/// Test infrastructure relays process-tracking and build-artifact settings
/// through these.
const PRESERVED_PREFIXES: &[&str] = &["TESTPILOT_", "EDENFS_"];

pub type DaemonEnv = BTreeMap<String, String>;

pub fn build_daemon_env<I>(vars: I) -> DaemonEnv
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env = DaemonEnv::new();
    env.insert("PATH".to_string(), SAFE_PATH.join(":"));

    for (name, value) in vars {
        let keep = PRESERVED.contains(&name.as_str())
            || PRESERVED_PREFIXES.iter().any(|p| name.starts_with(p));
        if keep {
            env.insert(name, value);
        }
    }
    env
}

/// [`build_daemon_env`] applied to the current process environment.
pub fn current_daemon_env() -> DaemonEnv {
    build_daemon_env(std::env::vars())
}
