pub mod clienv;
pub mod client_dir;
pub mod config;
pub mod daemon;
pub mod error;
pub mod ini;
pub mod locked_file;
pub mod mounts;
pub mod paths;
pub mod registry;

pub use config::{ConfigStore, RepoKind, RepositoryDefinition};
pub use error::{EdenError, ErrorKind, Result};
pub use mounts::{ClientInfo, MountManager};
pub use paths::EdenPaths;
pub use registry::MountRegistry;
