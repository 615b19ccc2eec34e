//! Removal guard for temporary files.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Deletes the file at `path` on drop unless defused.
///
/// Used while a replacement file is being written next to its final
/// location, so an aborted write does not leave the temporary behind.
pub struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file: it has been renamed into place (or is already gone).
    pub fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("removed abandoned {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}
