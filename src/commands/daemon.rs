use super::{mount_manager, supervisor};
use eden_cli::daemon::{StartOptions, StopOutcome};
use eden_cli::EdenPaths;
use std::process::ExitCode;
use std::time::Duration;

pub(crate) async fn cmd_start(paths: &EdenPaths, opts: StartOptions) -> anyhow::Result<()> {
    mount_manager(paths).rocks_db_dir()?;
    let health = supervisor(paths).start(&opts).await?;
    match health.pid {
        Some(pid) => println!("Started edenfs (pid {pid})"),
        None => println!("Started edenfs"),
    }
    println!("Logs available at {}", paths.daemon_log().display());
    Ok(())
}

pub(crate) async fn cmd_stop(paths: &EdenPaths, timeout: u64) -> anyhow::Result<ExitCode> {
    let outcome = supervisor(paths).stop(Duration::from_secs(timeout)).await?;
    match outcome {
        StopOutcome::NotRunning => eprintln!("edenfs is not running"),
        StopOutcome::ShutdownRequested => println!("Sent async shutdown request to edenfs."),
        StopOutcome::ExitedCleanly => println!("edenfs exited cleanly."),
        StopOutcome::Killed => eprintln!("Terminated edenfs with SIGKILL"),
    }
    Ok(exit_code(outcome.exit_code()))
}

pub(crate) async fn cmd_health(paths: &EdenPaths) -> anyhow::Result<ExitCode> {
    match supervisor(paths).health().await {
        Ok(health) if health.is_healthy() => {
            println!("eden running normally (pid {})", health.pid.unwrap_or_default());
            Ok(ExitCode::SUCCESS)
        }
        Ok(health) => {
            println!("edenfs not healthy: {}", health.detail);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            println!("edenfs not healthy: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
