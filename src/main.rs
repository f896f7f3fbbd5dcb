mod args;
mod commands;

use args::{Cli, Commands};
use clap::Parser;
use eden_cli::{clienv, EdenPaths};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    // stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(clienv::log_filter()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = EdenPaths::resolve(cli.config_dir, cli.etc_eden_dir, cli.home_dir);

    match cli.command {
        Commands::Repository {
            name,
            path,
            with_buck,
        } => commands::repository::cmd_repository(&paths, name, path, with_buck)?,
        Commands::Clone {
            repo,
            path,
            snapshot,
        } => commands::mounts::cmd_clone(&paths, &repo, &path, snapshot.as_deref()).await?,
        Commands::Mount { path } => commands::mounts::cmd_mount(&paths, &path).await?,
        Commands::Unmount { path, no_forget } => {
            commands::mounts::cmd_unmount(&paths, &path, !no_forget).await?
        }
        Commands::List => commands::mounts::cmd_list(&paths)?,
        Commands::Info { path } => commands::mounts::cmd_info(&paths, path.as_deref())?,
        Commands::Checkout { path, revision } => {
            commands::mounts::cmd_checkout(&paths, &path, &revision).await?
        }
        Commands::Config { command } => commands::config::cmd_config(&paths, command)?,
        Commands::Health => return commands::daemon::cmd_health(&paths).await,
        Commands::Start {
            daemon_binary,
            foreground,
            gdb,
            gdb_args,
            strace,
            extra_args,
        } => {
            let opts = eden_cli::daemon::StartOptions {
                daemon_binary: daemon_binary.unwrap_or_else(clienv::daemon_binary),
                extra_args,
                gdb,
                gdb_args,
                strace_file: strace,
                foreground,
            };
            commands::daemon::cmd_start(&paths, opts).await?
        }
        Commands::Stop { timeout } => return commands::daemon::cmd_stop(&paths, timeout).await,
    }

    Ok(ExitCode::SUCCESS)
}
