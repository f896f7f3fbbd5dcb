//! Cross-process read-modify-write of a single file.
//!
//! A [`LockedFile`] holds an exclusive advisory lock on `<path>.lock` for as
//! long as it lives. While held, the target may be read and replaced through
//! [`LockedFile::commit`], which writes a sibling temp file and renames it over
//! the target so readers only ever observe the old or the new contents.
//!
//! The lock file is unlinked *before* the lock is dropped. A process that
//! opened the old lock file and is blocked in `flock` will, once it wins the
//! lock, notice its descriptor no longer matches the file on disk and retry.

use crate::error::{IoContext, Result};
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const DEFAULT_MODE: u32 = 0o644;

pub struct LockedFile {
    path: PathBuf,
    lock_path: PathBuf,
    lock: Option<Flock<File>>,
}

impl LockedFile {
    /// Block until the lock for `path` is held. The target itself need not exist.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lock_path = lock_path_for(&path);

        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)
                .io_context(|| format!("failed to open lock file {}", lock_path.display()))?;

            let lock = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
                crate::EdenError::io(
                    format!("failed to lock {}", lock_path.display()),
                    errno.into(),
                )
            })?;

            if same_file_on_disk(&lock, &lock_path)? {
                debug!(path = %path.display(), "Acquired file lock");
                return Ok(Self {
                    path,
                    lock_path,
                    lock: Some(lock),
                });
            }

            // Locked a file the previous holder already unlinked.
            trace!(lock = %lock_path.display(), "Stale lock file, retrying");
            drop(lock);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents of the target, empty when it does not exist yet.
    pub fn read_to_string(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(crate::EdenError::io(
                format!("failed to read {}", self.path.display()),
                e,
            )),
        }
    }

    /// Atomically replace the target with `contents`.
    pub fn commit(&self, contents: &[u8]) -> Result<()> {
        self.commit_with(|file| file.write_all(contents))
    }

    /// Atomically replace the target with whatever `write` produces.
    ///
    /// If `write` or any later step fails the temp file is removed and the
    /// target is left exactly as it was.
    pub fn commit_with<F>(&self, write: F) -> Result<()>
    where
        F: FnOnce(&mut File) -> std::io::Result<()>,
    {
        let mode = match fs::metadata(&self.path) {
            Ok(meta) => meta.permissions().mode() & 0o777,
            Err(e) if e.kind() == ErrorKind::NotFound => DEFAULT_MODE,
            Err(e) => {
                return Err(crate::EdenError::io(
                    format!("failed to stat {}", self.path.display()),
                    e,
                ))
            }
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let prefix = format!(
            "{}.tmp.",
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );

        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .tempfile_in(dir)
            .io_context(|| format!("failed to create temp file in {}", dir.display()))?;

        write(tmp.as_file_mut())
            .and_then(|()| tmp.as_file().sync_all())
            .io_context(|| format!("failed to write {}", tmp.path().display()))?;
        fs::set_permissions(tmp.path(), Permissions::from_mode(mode))
            .io_context(|| format!("failed to chmod {}", tmp.path().display()))?;

        tmp.persist(&self.path).map_err(|e| {
            crate::EdenError::io(format!("failed to rename onto {}", self.path.display()), e.error)
        })?;

        debug!(path = %self.path.display(), mode = %format!("{mode:o}"), "Committed file");
        Ok(())
    }

    /// Remove the lock file, then drop the OS lock.
    pub fn release(mut self) -> Result<()> {
        self.unlock()
    }

    fn unlock(&mut self) -> Result<()> {
        let Some(lock) = self.lock.take() else {
            return Ok(());
        };
        let removed = fs::remove_file(&self.lock_path)
            .io_context(|| format!("failed to remove lock file {}", self.lock_path.display()));
        drop(lock);
        trace!(path = %self.path.display(), "Released file lock");
        removed
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        if let Err(e) = self.unlock() {
            tracing::warn!("{}", e);
        }
    }
}

pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn same_file_on_disk(locked: &File, lock_path: &Path) -> Result<bool> {
    let held = locked
        .metadata()
        .io_context(|| format!("failed to stat {}", lock_path.display()))?;
    match fs::symlink_metadata(lock_path) {
        Ok(on_disk) => Ok(held.dev() == on_disk.dev() && held.ino() == on_disk.ino()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(crate::EdenError::io(
            format!("failed to stat {}", lock_path.display()),
            e,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Barrier;
    use std::thread;

    fn leftover_temp_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.contains(".tmp."))
            .collect()
    }

    #[test]
    fn test_commit_creates_file_with_default_mode() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("settings");

        let locked = LockedFile::acquire(&target).unwrap();
        assert_eq!(locked.read_to_string().unwrap(), "");
        locked.commit(b"hello\n").unwrap();
        locked.release().unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "hello\n");
        let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
        assert!(!lock_path_for(&target).exists());
    }

    #[test]
    fn test_commit_preserves_existing_mode() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("settings");
        fs::write(&target, "old").unwrap();
        fs::set_permissions(&target, Permissions::from_mode(0o600)).unwrap();

        let locked = LockedFile::acquire(&target).unwrap();
        locked.commit(b"new").unwrap();
        drop(locked);

        let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
    }

    #[test]
    fn test_failed_commit_leaves_original_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("settings");
        fs::write(&target, "original contents\n").unwrap();

        let locked = LockedFile::acquire(&target).unwrap();
        let result = locked.commit_with(|file| {
            file.write_all(b"half of the new")?;
            Err(std::io::Error::new(ErrorKind::Other, "disk full"))
        });
        assert!(result.is_err());
        drop(locked);

        assert_eq!(fs::read(&target).unwrap(), b"original contents\n");
        assert!(leftover_temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_drop_removes_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("settings");
        {
            let _locked = LockedFile::acquire(&target).unwrap();
            assert!(lock_path_for(&target).exists());
        }
        assert!(!lock_path_for(&target).exists());
    }

    #[test]
    fn test_concurrent_increments_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let target = Arc::new(dir.path().join("counter"));
        fs::write(target.as_path(), "0").unwrap();

        const WORKERS: usize = 8;
        const ROUNDS: usize = 20;
        let barrier = Arc::new(Barrier::new(WORKERS));

        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let target = Arc::clone(&target);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..ROUNDS {
                        let locked = LockedFile::acquire(target.as_path()).unwrap();
                        let n: usize = locked.read_to_string().unwrap().trim().parse().unwrap();
                        locked.commit((n + 1).to_string().as_bytes()).unwrap();
                        locked.release().unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let total: usize = fs::read_to_string(target.as_path()).unwrap().parse().unwrap();
        assert_eq!(total, WORKERS * ROUNDS);
        assert!(!lock_path_for(&target).exists());
    }
}
