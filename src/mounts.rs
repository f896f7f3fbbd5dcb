//! Mount lifecycle: clone, mount, unmount and checkout, coordinating the
//! config store, the metadata directories, the mount registry and the daemon.
//!
//! Steps run in a fixed order and nothing is rolled back. A clone that fails
//! after creating its metadata directory leaves that directory behind; the
//! registry is only updated once the daemon has accepted the mount.

use crate::client_dir::{id_for_mount, ClientDir, RevisionId};
use crate::config::ConfigStore;
use crate::daemon::control::EdenControl;
use crate::error::{EdenError, IoContext, Result};
use crate::registry::MountRegistry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What `eden info` reports for one mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    #[serde(rename = "bind-mounts")]
    pub bind_mounts: BTreeMap<String, String>,
    pub mount: PathBuf,
    pub snapshot: String,
    #[serde(rename = "client-dir")]
    pub client_dir: PathBuf,
}

pub struct MountManager<C> {
    config: ConfigStore,
    registry: MountRegistry,
    control: C,
}

impl<C: EdenControl> MountManager<C> {
    pub fn new(config: ConfigStore, control: C) -> Self {
        let registry = MountRegistry::new(config.paths());
        Self {
            config,
            registry,
            control,
        }
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn registry(&self) -> &MountRegistry {
        &self.registry
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    /// Create a new checkout of `repo_name` at `path` and register it.
    /// Returns the canonical mount path.
    pub async fn clone(
        &self,
        repo_name: &str,
        path: &Path,
        snapshot: Option<&RevisionId>,
    ) -> Result<PathBuf> {
        let repo = self.config.repository(repo_name)?;
        if self.registry.contains(path)? {
            return Err(already_registered(path));
        }

        prepare_destination(path)?;
        let mount = fs::canonicalize(path)
            .io_context(|| format!("failed to resolve {}", path.display()))?;
        if mount != path && self.registry.contains(&mount)? {
            return Err(already_registered(&mount));
        }

        let client_dir = ClientDir::create(
            &self.config.paths().clients_dir(),
            &mount,
            &repo,
            snapshot,
        )?;

        self.control.mount(&mount, client_dir.path()).await?;
        self.registry.add(&mount, &id_for_mount(&mount))?;
        info!(mount = %mount.display(), repo = %repo.name, "Cloned");
        Ok(mount)
    }

    /// Ask the daemon to mount an already-registered client.
    pub async fn mount(&self, path: &Path) -> Result<PathBuf> {
        let mount = real_path(path)?;
        let client_dir = ClientDir::open(self.registry.client_dir(&mount)?);
        client_dir.repo_name()?;

        fs::create_dir_all(&mount)
            .io_context(|| format!("failed to create {}", mount.display()))?;

        let root = mount.join(".eden").join("root");
        match fs::read_link(&root) {
            Ok(target) if target == mount => {
                return Err(EdenError::Usage(format!(
                    "Mount point in use! {} is already mounted by Eden.",
                    mount.display()
                )));
            }
            Ok(target) => {
                return Err(EdenError::Usage(format!(
                    "Mount point in use! {} is already mounted by Eden as part of {}.",
                    mount.display(),
                    target.display()
                )));
            }
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::InvalidInput) => {}
            Err(e) => {
                return Err(EdenError::io(
                    format!("failed to inspect {}", root.display()),
                    e,
                ))
            }
        }

        self.control.mount(&mount, client_dir.path()).await?;
        info!(mount = %mount.display(), "Mounted");
        Ok(mount)
    }

    /// Unmount `path`. With `forget`, also drop its registry entry, metadata
    /// directory and the empty mount point. Nothing local changes unless the
    /// daemon unmount succeeds.
    pub async fn unmount(&self, path: &Path, forget: bool) -> Result<()> {
        let mount = real_path(path)?;
        self.control.unmount(&mount).await?;
        if !forget {
            info!(mount = %mount.display(), "Unmounted");
            return Ok(());
        }

        let client_dir = ClientDir::open(self.registry.client_dir(&mount)?);
        self.registry.remove(&mount)?;
        client_dir.remove()?;
        fs::remove_dir(&mount)
            .io_context(|| format!("failed to remove mount point {}", mount.display()))?;
        info!(mount = %mount.display(), "Unmounted and removed");
        Ok(())
    }

    pub async fn checkout(&self, path: &Path, snapshot: &RevisionId) -> Result<()> {
        let mount = real_path(path)?;
        self.control
            .check_out_revision(&mount, &snapshot.to_string())
            .await?;
        debug!(mount = %mount.display(), %snapshot, "Checked out");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<PathBuf>> {
        self.registry.list()
    }

    pub fn client_info(&self, path: &Path) -> Result<ClientInfo> {
        let mount = real_path(path)?;
        let client_dir = ClientDir::open(self.registry.client_dir(&mount)?);
        let repo = self.config.repository(&client_dir.repo_name()?)?;
        let snapshot = client_dir.snapshot()?;
        Ok(ClientInfo {
            bind_mounts: repo.bind_mounts,
            mount,
            snapshot: snapshot.to_string(),
            client_dir: client_dir.path().to_path_buf(),
        })
    }

    pub fn all_client_info(&self) -> Result<BTreeMap<PathBuf, ClientInfo>> {
        self.registry
            .list()?
            .into_iter()
            .map(|mount| Ok((mount.clone(), self.client_info(&mount)?)))
            .collect()
    }

    /// Storage directory for the daemon's local store, created on demand.
    pub fn rocks_db_dir(&self) -> Result<PathBuf> {
        let dir = self.config.paths().rocks_db_dir();
        fs::create_dir_all(&dir).io_context(|| format!("failed to create {}", dir.display()))?;
        Ok(dir)
    }
}

fn already_registered(path: &Path) -> EdenError {
    EdenError::Usage(format!("mount path {} already exists.", path.display()))
}

/// Destination must be absent (created here), or an empty directory.
fn prepare_destination(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(meta) if !meta.is_dir() => Err(EdenError::NotADirectory {
            path: path.to_path_buf(),
        }),
        Ok(_) => {
            let mut entries = fs::read_dir(path)
                .io_context(|| format!("failed to list {}", path.display()))?;
            if entries.next().is_some() {
                return Err(EdenError::DirectoryNotEmpty {
                    path: path.to_path_buf(),
                });
            }
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => fs::create_dir_all(path)
            .io_context(|| format!("failed to create {}", path.display())),
        Err(e) => Err(EdenError::io(format!("failed to stat {}", path.display()), e)),
    }
}

/// Canonical form of `path`, or its absolute form when it does not exist yet.
fn real_path(path: &Path) -> Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(real) => Ok(real),
        Err(e) if e.kind() == ErrorKind::NotFound => std::path::absolute(path)
            .io_context(|| format!("failed to resolve {}", path.display())),
        Err(e) => Err(EdenError::io(format!("failed to resolve {}", path.display()), e)),
    }
}
