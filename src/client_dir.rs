//! Per-mount metadata directory under `<state>/clients/<id>`:
//!
//! - `edenrc`: `[repository] name = <repo>`
//! - `SNAPSHOT`: 8-byte magic followed by the 20-byte revision id
//! - `bind-mounts/<name>/`: one per bind mount the repository declares

use crate::config::{read_ini, update_ini, RepositoryDefinition};
use crate::error::{EdenError, IoContext, Result};
use crate::ini::Section;
use sha1::{Digest, Sha1};
use std::fmt;
use std::fs;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Format version 1 of the revision marker.
pub const SNAPSHOT_MAGIC: &[u8; 8] = b"eden\x00\x00\x00\x01";

const LOCAL_CONFIG: &str = "edenrc";
const SNAPSHOT: &str = "SNAPSHOT";
const BIND_MOUNTS_DIR: &str = "bind-mounts";
const REPOSITORY_SECTION: &str = "repository";

/// 20-byte revision hash, written as 40 hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RevisionId([u8; 20]);

impl RevisionId {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl FromStr for RevisionId {
    type Err = EdenError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid =
            || EdenError::Usage(format!("invalid revision id \"{s}\": expected 40 hex characters"));
        let bytes = hex::decode(s).map_err(|_| invalid())?;
        let bytes: [u8; 20] = bytes.try_into().map_err(|_| invalid())?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Metadata directory name for a mount: sha1 of the path string.
pub fn id_for_mount(mount: &Path) -> String {
    let mut hasher = Sha1::new();
    hasher.update(mount.as_os_str().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDir {
    path: PathBuf,
}

impl ClientDir {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Build the metadata directory for `mount`. Each step completes before the
    /// next starts; a failure part way leaves the earlier steps on disk.
    pub fn create(
        clients_dir: &Path,
        mount: &Path,
        repo: &RepositoryDefinition,
        snapshot: Option<&RevisionId>,
    ) -> Result<Self> {
        let dir = Self::open(clients_dir.join(id_for_mount(mount)));
        fs::create_dir_all(&dir.path)
            .io_context(|| format!("failed to create {}", dir.path.display()))?;

        update_ini(&dir.path.join(LOCAL_CONFIG), |doc| {
            let mut section = Section::new(REPOSITORY_SECTION);
            section.set("name", repo.name.as_str());
            doc.set_section(section);
            Ok(())
        })?;

        let snapshot = snapshot
            .ok_or_else(|| EdenError::StateCorruption("snapshot id not provided".to_string()))?;
        dir.write_snapshot(snapshot)?;

        let bind_mounts = dir.bind_mounts_dir();
        fs::create_dir_all(&bind_mounts)
            .io_context(|| format!("failed to create {}", bind_mounts.display()))?;
        for name in repo.bind_mounts.keys() {
            let sub = bind_mounts.join(name);
            fs::create_dir_all(&sub)
                .io_context(|| format!("failed to create {}", sub.display()))?;
        }

        debug!(dir = %dir.path.display(), repo = %repo.name, %snapshot, "Created client directory");
        Ok(dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bind_mounts_dir(&self) -> PathBuf {
        self.path.join(BIND_MOUNTS_DIR)
    }

    /// Repository this client was cloned from.
    pub fn repo_name(&self) -> Result<String> {
        let config = self.path.join(LOCAL_CONFIG);
        read_ini(&config)?
            .and_then(|doc| doc.get(REPOSITORY_SECTION, "name").map(str::to_string))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                EdenError::StateCorruption(format!(
                    "could not find repository for {}",
                    self.path.display()
                ))
            })
    }

    pub fn snapshot(&self) -> Result<RevisionId> {
        let file = self.path.join(SNAPSHOT);
        let data = fs::read(&file).io_context(|| format!("failed to read {}", file.display()))?;
        let Some(id) = data.strip_prefix(SNAPSHOT_MAGIC.as_slice()) else {
            return Err(EdenError::StateCorruption(format!(
                "{}: bad snapshot magic",
                file.display()
            )));
        };
        let bytes: [u8; 20] = id.try_into().map_err(|_| {
            EdenError::StateCorruption(format!(
                "{}: expected 20-byte revision id, found {} bytes",
                file.display(),
                id.len()
            ))
        })?;
        Ok(RevisionId(bytes))
    }

    /// Replace `SNAPSHOT` atomically.
    pub fn write_snapshot(&self, id: &RevisionId) -> Result<()> {
        let target = self.path.join(SNAPSHOT);
        let mut tmp = tempfile::Builder::new()
            .prefix(".SNAPSHOT.tmp.")
            .tempfile_in(&self.path)
            .io_context(|| format!("failed to create temp file in {}", self.path.display()))?;
        let mut contents = SNAPSHOT_MAGIC.to_vec();
        contents.extend_from_slice(id.as_bytes());
        tmp.write_all(&contents)
            .io_context(|| format!("failed to write {}", target.display()))?;
        tmp.as_file()
            .sync_all()
            .io_context(|| format!("failed to sync {}", target.display()))?;
        tmp.persist(&target)
            .map_err(|e| EdenError::io(format!("failed to replace {}", target.display()), e.error))?;
        Ok(())
    }

    pub fn remove(self) -> Result<()> {
        fs::remove_dir_all(&self.path)
            .io_context(|| format!("failed to remove {}", self.path.display()))
    }
}
