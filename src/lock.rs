//! Exclusive write lock over a replica directory.

use crate::error::{ReplicaError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = "tablerepl.lock";

/// Holds the directory lock until dropped.
#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Take the lock without waiting. Fails if another writer holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ReplicaError::Lock {
                path: dir.to_path_buf(),
                explanation: format!("couldn't open lock file {}: {}", path.display(), e),
            })?;

        if let Err(e) = file.try_lock_exclusive() {
            let explanation = if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                "already locked by another process".to_string()
            } else {
                format!("locking failed: {}", e)
            };
            return Err(ReplicaError::Lock {
                path: dir.to_path_buf(),
                explanation,
            });
        }

        tracing::trace!(lock = %path.display(), "acquired directory lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}
