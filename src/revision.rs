//! Access to the replica's current revision.

use crate::changeset::protocol::decode_revision;
use crate::error::{ReplicaError, Result};
use std::path::Path;

/// Reports the revision the replica's tables are currently open at.
///
/// Only consulted when the caller vouches that the existing on-disk state
/// is intact; an interrupted apply may leave it unreadable or misleading.
pub trait RevisionReader: Send + Sync {
    fn current_revision(&self, dir: &Path) -> Result<u64>;
}

impl<F> RevisionReader for F
where
    F: Fn(&Path) -> Result<u64> + Send + Sync,
{
    fn current_revision(&self, dir: &Path) -> Result<u64> {
        self(dir)
    }
}

/// Reader for replicas whose state is never trusted.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownRevision;

impl RevisionReader for UnknownRevision {
    fn current_revision(&self, dir: &Path) -> Result<u64> {
        Err(ReplicaError::Revision {
            path: dir.to_path_buf(),
            detail: "no revision source configured".to_string(),
        })
    }
}

/// Whether encoded revision `rev` has reached encoded revision `target`.
pub fn check_revision_at_least(rev: &[u8], target: &[u8]) -> Result<bool> {
    let rev = decode_revision(rev)?;
    let target = decode_revision(target)?;
    Ok(rev >= target)
}
