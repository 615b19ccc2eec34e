//! Apply replication changesets to a replica's table files.
//!
//! A primary periodically emits a changeset describing one revision
//! transition of its on-disk tables. [`Replicator`] reads such a changeset
//! from a connection and applies it under an exclusive directory lock, so
//! that afterwards the replica's files match the primary's at the target
//! revision.

pub mod changeset;
pub mod config;
pub mod error;
pub mod lock;
pub mod revision;
pub mod temp_file;

pub use changeset::{AppliedChangeset, ApplyStats, Replicator, Stage};
pub use config::{ReplicatorConfig, MAX_CHANGESETS_ENV};
pub use error::{ProtocolError, ReplicaError, Result};
pub use lock::DirLock;
pub use revision::{check_revision_at_least, RevisionReader, UnknownRevision};
