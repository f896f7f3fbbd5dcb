pub(crate) mod config;
pub(crate) mod daemon;
pub(crate) mod mounts;
pub(crate) mod repository;

use eden_cli::daemon::{HealthOracle, SocketClient, Supervisor, SystemProcessTable};
use eden_cli::{ConfigStore, EdenPaths, MountManager};

pub(crate) fn mount_manager(paths: &EdenPaths) -> MountManager<SocketClient> {
    MountManager::new(
        ConfigStore::new(paths.clone()),
        SocketClient::new(paths.control_socket()),
    )
}

pub(crate) fn supervisor(paths: &EdenPaths) -> Supervisor<SocketClient, SystemProcessTable> {
    let oracle = HealthOracle::new(
        SocketClient::new(paths.control_socket()),
        SystemProcessTable,
        paths.daemon_lock_file(),
    );
    Supervisor::new(paths.clone(), oracle)
}
