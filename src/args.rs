use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "eden")]
#[command(version)]
#[command(about = "Manage Eden checkouts and the edenfs daemon", long_about = None)]
pub(crate) struct Cli {
    /// State directory (default: ~/local/.eden, or EDEN_CONFIG_DIR)
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// System config directory (default: /etc/eden, or EDEN_ETC_DIR)
    #[arg(long, global = true)]
    pub etc_eden_dir: Option<PathBuf>,

    /// Home directory holding .edenrc (default: $HOME)
    #[arg(long, global = true)]
    pub home_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// List configured repositories, or add one
    Repository {
        /// Name of the repository to add
        name: Option<String>,

        /// Path to the repository source
        #[arg(requires = "name")]
        path: Option<PathBuf>,

        /// Also bind-mount buck-out into checkouts of this repository
        #[arg(long, requires = "path")]
        with_buck: bool,
    },

    /// Create a new checkout of a configured repository
    Clone {
        /// Repository name from the config
        repo: String,

        /// Where to mount the checkout
        path: PathBuf,

        /// Revision to check out (40 hex characters)
        #[arg(long)]
        snapshot: Option<String>,
    },

    /// Remount an existing checkout
    Mount { path: PathBuf },

    /// Unmount a checkout and, by default, forget it
    Unmount {
        path: PathBuf,

        /// Keep the checkout registered so it can be mounted again
        #[arg(long)]
        no_forget: bool,
    },

    /// List registered mount points
    List,

    /// Show details for one checkout, or all of them as JSON
    Info { path: Option<PathBuf> },

    /// Check out a different revision in a mounted checkout
    Checkout { path: PathBuf, revision: String },

    /// Query the merged configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Report whether edenfs is running
    Health,

    /// Start the edenfs daemon
    Start {
        /// Daemon binary (default: EDEN_DAEMON_BINARY or the installed edenfs)
        #[arg(long)]
        daemon_binary: Option<PathBuf>,

        /// Run in the foreground instead of detaching
        #[arg(long)]
        foreground: bool,

        /// Run under gdb (implies --foreground)
        #[arg(long, conflicts_with = "strace")]
        gdb: bool,

        /// Extra argument for gdb; repeat as needed
        #[arg(long = "gdb-arg", requires = "gdb", allow_hyphen_values = true)]
        gdb_args: Vec<String>,

        /// Run under strace, writing the trace to FILE
        #[arg(long, value_name = "FILE")]
        strace: Option<PathBuf>,

        /// Arguments passed through to edenfs
        #[arg(last = true)]
        extra_args: Vec<String>,
    },

    /// Stop the edenfs daemon
    Stop {
        /// Seconds to wait for a clean exit before SIGKILL; 0 returns
        /// immediately after requesting shutdown
        #[arg(short, long, default_value = "15")]
        timeout: u64,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigCommands {
    /// Print one value, addressed as `section.key`
    Get { key: String },

    /// Print every section of the merged configuration
    Show,
}
