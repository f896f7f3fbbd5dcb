//! `config.json`: the persisted map from absolute mount path to the name of
//! its metadata directory under `clients/`.
//!
//! Nothing is cached. Queries read the file fresh, and mutations re-read it
//! while holding the file lock, so a duplicate added by a concurrent process
//! is detected at commit time instead of being overwritten.

use crate::error::{EdenError, IoContext, Result};
use crate::locked_file::LockedFile;
use crate::paths::EdenPaths;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

pub type MountMap = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct MountRegistry {
    path: PathBuf,
    clients_dir: PathBuf,
}

impl MountRegistry {
    pub fn new(paths: &EdenPaths) -> Self {
        Self {
            path: paths.mount_registry(),
            clients_dir: paths.clients_dir(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every registered mount path, sorted.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        Ok(self.entries()?.into_keys().map(PathBuf::from).collect())
    }

    pub fn entries(&self) -> Result<MountMap> {
        match fs::read_to_string(&self.path) {
            Ok(text) => parse(&self.path, &text),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(MountMap::new()),
            Err(e) => Err(EdenError::io(
                format!("failed to read {}", self.path.display()),
                e,
            )),
        }
    }

    pub fn contains(&self, mount: &Path) -> Result<bool> {
        Ok(self.entries()?.contains_key(&key(mount)))
    }

    /// Metadata directory id registered for `mount`.
    pub fn resolve(&self, mount: &Path) -> Result<String> {
        self.entries()?
            .remove(&key(mount))
            .ok_or_else(|| EdenError::NotFound(format!("could not find mount path {}", mount.display())))
    }

    /// Absolute metadata directory registered for `mount`.
    pub fn client_dir(&self, mount: &Path) -> Result<PathBuf> {
        Ok(self.clients_dir.join(self.resolve(mount)?))
    }

    pub fn add(&self, mount: &Path, dir_id: &str) -> Result<()> {
        self.update(|map| {
            let k = key(mount);
            if map.contains_key(&k) {
                return Err(EdenError::Usage(format!(
                    "mount path {} already exists.",
                    mount.display()
                )));
            }
            map.insert(k, dir_id.to_string());
            Ok(true)
        })?;
        debug!(mount = %mount.display(), dir_id, "Registered mount");
        Ok(())
    }

    /// Absent paths are ignored.
    pub fn remove(&self, mount: &Path) -> Result<()> {
        self.update(|map| Ok(map.remove(&key(mount)).is_some()))?;
        debug!(mount = %mount.display(), "Unregistered mount");
        Ok(())
    }

    /// `f` returns whether it changed the map; unchanged maps are not rewritten.
    fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut MountMap) -> Result<bool>,
    {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .io_context(|| format!("failed to create {}", parent.display()))?;
        }
        let locked = LockedFile::acquire(&self.path)?;
        let text = locked.read_to_string()?;
        let mut map = if text.trim().is_empty() {
            MountMap::new()
        } else {
            parse(&self.path, &text)?
        };
        if f(&mut map)? {
            locked.commit(serialize(&map)?.as_bytes())?;
        }
        locked.release()
    }
}

fn key(mount: &Path) -> String {
    mount.to_string_lossy().into_owned()
}

fn parse(path: &Path, text: &str) -> Result<MountMap> {
    serde_json::from_str(text).map_err(|source| EdenError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Sorted keys, two-space indent, trailing newline.
pub fn serialize(map: &MountMap) -> Result<String> {
    let mut text = serde_json::to_string_pretty(map).map_err(|source| EdenError::Json {
        path: PathBuf::new(),
        source,
    })?;
    text.push('\n');
    Ok(text)
}
