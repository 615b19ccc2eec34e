//! Optional side copy of the raw changeset stream.
//!
//! When archival is enabled, every byte consumed from the transport is
//! appended, in order, to `changes<start_revision>` in the database
//! directory. Pruning old archives is left to whoever configures the limit.

use crate::error::{ReplicaError, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

pub fn archive_file_name(start_revision: u64) -> String {
    format!("changes{}", start_revision)
}

pub struct ArchiveSink {
    file: Option<(PathBuf, File)>,
    bytes_written: u64,
}

impl ArchiveSink {
    pub fn disabled() -> Self {
        Self {
            file: None,
            bytes_written: 0,
        }
    }

    /// Open the archive for a changeset, or a disabled sink when
    /// `max_changesets` is zero.
    pub async fn create(dir: &Path, start_revision: u64, max_changesets: u32) -> Result<Self> {
        if max_changesets == 0 {
            return Ok(Self::disabled());
        }

        let path = dir.join(archive_file_name(start_revision));
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|e| ReplicaError::storage("failed to create changeset archive", &path, e))?;
        tracing::debug!(path = %path.display(), "archiving changeset");

        Ok(Self {
            file: Some((path, file)),
            bytes_written: 0,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|(path, _)| path.as_path())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub async fn append(&mut self, data: &[u8]) -> Result<()> {
        if let Some((path, file)) = self.file.as_mut() {
            file.write_all(data)
                .await
                .map_err(|e| ReplicaError::storage("failed to write changeset archive", &*path, e))?;
            self.bytes_written += data.len() as u64;
        }
        Ok(())
    }

    pub async fn finish(self) -> Result<()> {
        if let Some((path, mut file)) = self.file {
            file.flush()
                .await
                .map_err(|e| ReplicaError::storage("failed to write changeset archive", &path, e))?;
            file.sync_all()
                .await
                .map_err(|e| ReplicaError::storage("failed to sync changeset archive", &path, e))?;
        }
        Ok(())
    }
}
