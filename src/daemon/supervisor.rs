//! Starting and stopping the daemon process.
//!
//! `start` refuses to run a second daemon, builds the command line (optional
//! debugger or tracer wrapping, optional sudo), and then either replaces the
//! current process (foreground) or spawns a detached child and polls the
//! health oracle until the daemon is healthy, the child exits, or the
//! timeout expires.

use super::control::{ControlError, EdenControl};
use super::environment::{current_daemon_env, DaemonEnv};
use super::health::{HealthOracle, HealthStatus};
use super::privilege;
use super::process::ProcessTable;
use crate::error::{EdenError, IoContext, Result};
use crate::paths::EdenPaths;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How to launch the daemon
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub daemon_binary: PathBuf,
    /// Appended after the fixed arguments
    pub extra_args: Vec<String>,
    /// Run under gdb (implies foreground)
    pub gdb: bool,
    pub gdb_args: Vec<String>,
    /// Run under strace, writing the trace to this file
    pub strace_file: Option<PathBuf>,
    /// Replace the current process instead of spawning a child
    pub foreground: bool,
}

impl StartOptions {
    pub fn new(daemon_binary: impl Into<PathBuf>) -> Self {
        Self {
            daemon_binary: daemon_binary.into(),
            ..Self::default()
        }
    }
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    /// Asked to shut down without waiting (zero timeout)
    ShutdownRequested,
    ExitedCleanly,
    /// Did not exit within the timeout and was sent SIGKILL
    Killed,
}

impl StopOutcome {
    /// Process exit code for `eden stop`.
    pub fn exit_code(self) -> i32 {
        match self {
            StopOutcome::ExitedCleanly | StopOutcome::ShutdownRequested => 0,
            StopOutcome::NotRunning => 2,
            StopOutcome::Killed => 3,
        }
    }
}

pub struct Supervisor<C, P> {
    paths: EdenPaths,
    oracle: HealthOracle<C, P>,
    env: DaemonEnv,
    timeout: Duration,
    poll_interval: Duration,
}

impl<C: EdenControl, P: ProcessTable> Supervisor<C, P> {
    pub fn new(paths: EdenPaths, oracle: HealthOracle<C, P>) -> Self {
        Self {
            paths,
            oracle,
            env: current_daemon_env(),
            timeout: DEFAULT_START_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_env(mut self, env: DaemonEnv) -> Self {
        self.env = env;
        self
    }

    /// How long to wait for the daemon to become healthy.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn oracle(&self) -> &HealthOracle<C, P> {
        &self.oracle
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        self.oracle.check().await
    }

    /// Start the daemon. In foreground mode this only returns on failure.
    pub async fn start(&self, opts: &StartOptions) -> Result<HealthStatus> {
        let health = self.oracle.check().await?;
        if health.is_healthy() {
            let pid = health
                .pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(EdenError::Startup(format!(
                "edenfs is already running (pid {pid})"
            )));
        }

        if opts.gdb && opts.strace_file.is_some() {
            return Err(EdenError::Startup(
                "cannot run eden under gdb and strace together".to_string(),
            ));
        }

        let escalate = privilege::needs_escalation(&opts.daemon_binary)?;
        let cmd = self.build_command(opts, escalate);
        let foreground = opts.foreground || opts.gdb;
        info!(command = ?cmd, foreground, "Starting edenfs");

        if foreground {
            return Err(self.exec(&cmd));
        }

        let mut child = self.spawn_detached(&cmd)?;
        self.wait_for_healthy(&mut child).await
    }

    /// Full argv for the daemon, including wrappers.
    pub fn build_command(&self, opts: &StartOptions, escalate: bool) -> Vec<String> {
        let mut cmd = vec![
            opts.daemon_binary.to_string_lossy().into_owned(),
            "--edenDir".to_string(),
            self.paths.state_dir().to_string_lossy().into_owned(),
            "--etcEdenDir".to_string(),
            self.paths.etc_eden_dir().to_string_lossy().into_owned(),
            "--configPath".to_string(),
            self.paths.user_config().to_string_lossy().into_owned(),
        ];

        if opts.gdb {
            let mut wrapped = vec!["gdb".to_string()];
            wrapped.extend(opts.gdb_args.iter().cloned());
            wrapped.push("--args".to_string());
            wrapped.extend(cmd);
            cmd = wrapped;
        }
        if let Some(strace_file) = &opts.strace_file {
            let mut wrapped = vec![
                "strace".to_string(),
                "-fttT".to_string(),
                "-o".to_string(),
                strace_file.to_string_lossy().into_owned(),
            ];
            wrapped.extend(cmd);
            cmd = wrapped;
        }
        cmd.extend(opts.extra_args.iter().cloned());

        if escalate {
            cmd = privilege::wrap_with_sudo(cmd, &self.env);
        }
        cmd
    }

    fn exec(&self, cmd: &[String]) -> EdenError {
        let err = std::process::Command::new(&cmd[0])
            .args(&cmd[1..])
            .env_clear()
            .envs(&self.env)
            .exec();
        EdenError::Startup(format!("failed to exec {}: {}", cmd[0], err))
    }

    /// Spawn in a new session with output appended to the daemon log.
    fn spawn_detached(&self, cmd: &[String]) -> Result<Child> {
        let log_path = self.paths.daemon_log();
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)
                .io_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .io_context(|| format!("failed to open {}", log_path.display()))?;
        writeln!(
            log,
            "{}: starting edenfs",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        )
        .io_context(|| format!("failed to write {}", log_path.display()))?;
        let stdout = log
            .try_clone()
            .io_context(|| format!("failed to duplicate {}", log_path.display()))?;

        let mut command = Command::new(&cmd[0]);
        command
            .args(&cmd[1..])
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(log));
        // SAFETY: setsid is async-signal-safe and touches no parent state.
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid()
                    .map(drop)
                    .map_err(std::io::Error::from)
            });
        }

        let child = command
            .spawn()
            .io_context(|| format!("failed to spawn {}", cmd[0]))?;
        debug!(pid = ?child.id(), log = %log_path.display(), "Spawned edenfs");
        Ok(child)
    }

    /// Poll until healthy. The child exiting first is fatal immediately.
    pub async fn wait_for_healthy(&self, child: &mut Child) -> Result<HealthStatus> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, self.oracle.check()).await {
                Ok(Ok(health)) if health.is_healthy() => {
                    info!(pid = ?health.pid, "edenfs is healthy");
                    return Ok(health);
                }
                Ok(Ok(health)) => debug!(status = %health.status, "edenfs not healthy yet"),
                Ok(Err(EdenError::Transport(e))) => {
                    debug!("Health query failed while starting: {}", e)
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => debug!("Health query still pending at the deadline"),
            }

            if let Some(status) = child
                .try_wait()
                .io_context(|| "failed to poll edenfs process".to_string())?
            {
                return Err(EdenError::Startup(format!(
                    "edenfs exited before becoming healthy: {}",
                    describe_exit(status)
                )));
            }

            if Instant::now() >= deadline {
                return Err(EdenError::Startup(
                    "timed out waiting for edenfs to become healthy".to_string(),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Ask the daemon to shut down, then wait up to `timeout` for the process
    /// to exit before killing it. The queries to the daemon count against the
    /// same budget, so a daemon that stops answering is still killed on time.
    pub async fn stop(&self, timeout: Duration) -> Result<StopOutcome> {
        let deadline = Instant::now() + timeout;
        // A zero timeout skips waiting for exit, not for the request itself.
        let request_budget = || {
            if timeout.is_zero() {
                self.timeout
            } else {
                deadline.saturating_duration_since(Instant::now())
            }
        };

        let health = match tokio::time::timeout(request_budget(), self.oracle.check()).await {
            Ok(Ok(health)) => health,
            Ok(Err(EdenError::Transport(e))) => {
                warn!("edenfs is not responding: {}", e);
                self.oracle.check_using_lock_file()
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!("edenfs did not answer the health query in time");
                self.oracle.check_using_lock_file()
            }
        };
        let pid = match health.pid {
            Some(pid) if self.oracle.processes().is_running(pid) => pid,
            _ => return Ok(StopOutcome::NotRunning),
        };

        let shutdown = self.oracle.control().initiate_shutdown("eden stop");
        let requested = match tokio::time::timeout(request_budget(), shutdown).await {
            Ok(Ok(())) => true,
            Ok(Err(ControlError::NotRunning(_))) => false,
            Ok(Err(e)) => {
                warn!("edenfs is not responding: {}", e);
                false
            }
            Err(_) => {
                warn!("edenfs did not acknowledge the shutdown request in time");
                false
            }
        };
        if requested && timeout.is_zero() {
            return Ok(StopOutcome::ShutdownRequested);
        }

        loop {
            if !self.oracle.processes().is_running(pid) {
                info!(pid, "edenfs exited");
                return Ok(StopOutcome::ExitedCleanly);
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        warn!(pid, "edenfs did not exit in time, sending SIGKILL");
        match self.oracle.processes().kill(pid) {
            Ok(()) => Ok(StopOutcome::Killed),
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => Ok(StopOutcome::ExitedCleanly),
            Err(e) => Err(EdenError::io(format!("failed to kill edenfs (pid {pid})"), e)),
        }
    }
}

fn describe_exit(status: ExitStatus) -> String {
    match (status.signal(), status.code()) {
        (Some(signal), _) => format!("terminated with signal {signal}"),
        (None, Some(code)) => format!("exit status {code}"),
        (None, None) => status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::client::SocketClient;
    use crate::daemon::control::testing::FakeControl;
    use crate::daemon::process::testing::FakeProcessTable;
    use crate::error::ErrorKind;
    use tokio::net::UnixListener;
    use tokio::task::JoinHandle;

    fn supervisor<C: EdenControl>(
        dir: &tempfile::TempDir,
        control: C,
        processes: FakeProcessTable,
    ) -> Supervisor<C, FakeProcessTable> {
        let paths = EdenPaths::new(
            dir.path().join("state"),
            "/etc/eden",
            "/home/me",
            Some("me".to_string()),
        );
        let oracle = HealthOracle::new(control, processes, paths.daemon_lock_file());
        Supervisor::new(paths, oracle)
            .with_env(DaemonEnv::from([("PATH".to_string(), "/bin".to_string())]))
            .with_poll_interval(Duration::from_millis(10))
    }

    /// Control socket that accepts connections and never answers.
    fn silent_daemon(dir: &tempfile::TempDir) -> (SocketClient, JoinHandle<()>) {
        let socket = dir.path().join("silent.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                held.push(stream);
            }
        });
        (SocketClient::new(socket), server)
    }

    fn write_lock(dir: &tempfile::TempDir, pid: u32) {
        fs::create_dir_all(dir.path().join("state")).unwrap();
        fs::write(dir.path().join("state/lock"), format!("{pid}\n")).unwrap();
    }

    #[tokio::test]
    async fn test_start_refuses_when_already_alive() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir, FakeControl::alive(1234), FakeProcessTable::default());

        let err = sup
            .start(&StartOptions::new("/no/such/edenfs"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Startup);
        assert!(err.to_string().contains("pid 1234"), "{err}");
        assert!(!dir.path().join("state/logs").exists());
    }

    #[tokio::test]
    async fn test_start_rejects_gdb_with_strace() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir, FakeControl::not_running(), FakeProcessTable::default());

        let opts = StartOptions {
            gdb: true,
            strace_file: Some(PathBuf::from("/tmp/trace")),
            ..StartOptions::new("/no/such/edenfs")
        };
        let err = sup.start(&opts).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Startup);
        assert!(err.to_string().contains("gdb and strace"));
    }

    #[test]
    fn test_build_command_plain_and_escalated() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir, FakeControl::not_running(), FakeProcessTable::default());
        let state = dir.path().join("state").to_string_lossy().into_owned();
        let opts = StartOptions {
            extra_args: vec!["--foo".to_string()],
            ..StartOptions::new("/opt/edenfs")
        };

        assert_eq!(
            sup.build_command(&opts, false),
            vec![
                "/opt/edenfs".to_string(),
                "--edenDir".to_string(),
                state.clone(),
                "--etcEdenDir".to_string(),
                "/etc/eden".to_string(),
                "--configPath".to_string(),
                "/home/me/.edenrc".to_string(),
                "--foo".to_string(),
            ]
        );

        let escalated = sup.build_command(&opts, true);
        assert_eq!(&escalated[..3], &["/usr/bin/sudo", "PATH=/bin", "/opt/edenfs"]);
    }

    #[test]
    fn test_build_command_wrappers() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir, FakeControl::not_running(), FakeProcessTable::default());

        let gdb = StartOptions {
            gdb: true,
            gdb_args: vec!["-ex".to_string(), "run".to_string()],
            ..StartOptions::new("/opt/edenfs")
        };
        let cmd = sup.build_command(&gdb, false);
        assert_eq!(&cmd[..5], &["gdb", "-ex", "run", "--args", "/opt/edenfs"]);

        let strace = StartOptions {
            strace_file: Some(PathBuf::from("/tmp/trace")),
            ..StartOptions::new("/opt/edenfs")
        };
        let cmd = sup.build_command(&strace, false);
        assert_eq!(&cmd[..5], &["strace", "-fttT", "-o", "/tmp/trace", "/opt/edenfs"]);
    }

    #[tokio::test]
    async fn test_child_killed_by_signal_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir, FakeControl::not_running(), FakeProcessTable::default())
            .with_timeout(Duration::from_secs(60));

        let mut child = Command::new("sh")
            .args(["-c", "kill -9 $$"])
            .spawn()
            .unwrap();
        let started = std::time::Instant::now();
        let err = sup.wait_for_healthy(&mut child).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Startup);
        assert!(err.to_string().contains("signal 9"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_child_exit_status_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir, FakeControl::not_running(), FakeProcessTable::default());

        let mut child = Command::new("sh").args(["-c", "exit 3"]).spawn().unwrap();
        let err = sup.wait_for_healthy(&mut child).await.unwrap_err();
        assert!(err.to_string().ends_with("exit status 3"), "{err}");
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir, FakeControl::not_running(), FakeProcessTable::default())
            .with_timeout(Duration::from_millis(100));

        let mut child = Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap();
        let err = sup.wait_for_healthy(&mut child).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        child.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_returns_once_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir, FakeControl::alive(77), FakeProcessTable::default());

        let mut child = Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap();
        let health = sup.wait_for_healthy(&mut child).await.unwrap();
        assert_eq!(health.pid, Some(77));
        child.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir, FakeControl::not_running(), FakeProcessTable::default());

        let outcome = sup.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, StopOutcome::NotRunning);
        assert_eq!(outcome.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_stop_waits_for_clean_exit() {
        let dir = tempfile::tempdir().unwrap();
        let processes = FakeProcessTable::default().alive_for(500, 3);
        let sup = supervisor(&dir, FakeControl::alive(500), processes);

        let outcome = sup.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome, StopOutcome::ExitedCleanly);
        assert_eq!(sup.oracle().control().calls(), vec!["shutdown eden stop"]);
        assert!(sup.oracle().processes().killed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_with_zero_timeout_is_async() {
        let dir = tempfile::tempdir().unwrap();
        let processes = FakeProcessTable::default().alive_for(500, 100);
        let sup = supervisor(&dir, FakeControl::alive(500), processes);

        let outcome = sup.stop(Duration::ZERO).await.unwrap();
        assert_eq!(outcome, StopOutcome::ShutdownRequested);
    }

    #[tokio::test]
    async fn test_stop_kills_hung_daemon() {
        let dir = tempfile::tempdir().unwrap();
        write_lock(&dir, 600);
        let processes = FakeProcessTable::with_process(600, "edenfs").alive_for(600, usize::MAX);
        let sup = supervisor(&dir, FakeControl::not_running(), processes);

        let outcome = sup.stop(Duration::from_millis(50)).await.unwrap();
        assert_eq!(outcome, StopOutcome::Killed);
        assert_eq!(outcome.exit_code(), 3);
        assert_eq!(*sup.oracle().processes().killed.lock().unwrap(), vec![600]);
    }

    #[tokio::test]
    async fn test_wait_times_out_when_daemon_never_answers() {
        let dir = tempfile::tempdir().unwrap();
        let (client, server) = silent_daemon(&dir);
        let sup = supervisor(&dir, client, FakeProcessTable::default())
            .with_timeout(Duration::from_millis(200));

        let mut child = Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap();
        let wait = sup.wait_for_healthy(&mut child);
        let err = tokio::time::timeout(Duration::from_secs(3), wait)
            .await
            .expect("wait_for_healthy ignored its deadline")
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Startup);
        assert!(err.to_string().contains("timed out"), "{err}");
        child.kill().await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn test_stop_kills_daemon_that_never_answers() {
        let dir = tempfile::tempdir().unwrap();
        write_lock(&dir, 600);
        let (client, server) = silent_daemon(&dir);
        let processes = FakeProcessTable::with_process(600, "edenfs").alive_for(600, usize::MAX);
        let sup = supervisor(&dir, client, processes);

        let stop = sup.stop(Duration::from_millis(200));
        let outcome = tokio::time::timeout(Duration::from_secs(3), stop)
            .await
            .expect("stop ignored its timeout")
            .unwrap();

        assert_eq!(outcome, StopOutcome::Killed);
        assert_eq!(*sup.oracle().processes().killed.lock().unwrap(), vec![600]);
        server.abort();
    }

    #[tokio::test]
    async fn test_spawn_appends_marker_and_output_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir, FakeControl::not_running(), FakeProcessTable::default());
        let script = dir.path().join("fake-edenfs");
        fs::write(&script, "echo \"out $1\"\necho err >&2\n").unwrap();
        let script = script.to_string_lossy().into_owned();

        for run in ["first", "second"] {
            let cmd = ["/bin/sh".to_string(), script.clone(), run.to_string()];
            let mut child = sup.spawn_detached(&cmd).unwrap();
            assert!(child.wait().await.unwrap().success());
        }

        let log = fs::read_to_string(dir.path().join("state/logs/edenfs.log")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 6, "{log}");
        for (marker, run) in [(lines[0], "first"), (lines[3], "second")] {
            // "YYYY-MM-DD HH:MM:SS: starting edenfs"
            assert_eq!(marker.len(), 19 + ": starting edenfs".len(), "{marker}");
            assert!(marker.ends_with(": starting edenfs"), "{marker}");
            assert!(log.contains(&format!("out {run}\n")), "{log}");
        }
        let first_run = &lines[..3];
        assert!(first_run.contains(&"out first"));
        assert!(first_run.contains(&"err"));
    }
}
