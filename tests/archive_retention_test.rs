//! Integration tests for raw changeset archival.
//!
//! Archival is governed by the retention count: zero keeps nothing, any
//! positive count keeps a byte-for-byte copy of what was read.

mod common;

use common::{list_files, ChangesetBuilder};
use serial_test::serial;
use std::path::Path;
use std::time::Duration;
use tablerepl::changeset::archive_file_name;
use tablerepl::{ProtocolError, ReplicaError, Replicator, ReplicatorConfig, UnknownRevision};
use tempfile::TempDir;
use tokio::time::Instant;

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(5)
}

fn replicator(dir: &Path, max_changesets: u32) -> Replicator {
    Replicator::new(dir, ReplicatorConfig { max_changesets }, UnknownRevision)
}

// =============================================================================
// Retention disabled
// =============================================================================

#[tokio::test]
async fn test_no_archive_when_retention_is_zero() {
    let tmp = TempDir::new().unwrap();
    let stream = ChangesetBuilder::new(7, 8)
        .blocks("docdata", 4, &[(0, b"dddd")])
        .finish(8);

    let applied = replicator(tmp.path(), 0)
        .apply(&mut &stream[..], deadline(), false)
        .await
        .unwrap();

    assert_eq!(applied.stats.bytes_archived, 0);
    assert_eq!(list_files(tmp.path()), vec!["docdata.DB"]);
}

#[tokio::test]
async fn test_no_archive_after_failure_when_retention_is_zero() {
    let tmp = TempDir::new().unwrap();
    let stream = ChangesetBuilder::new(7, 8).raw(&[9]).finish(8);

    let err = replicator(tmp.path(), 0)
        .apply(&mut &stream[..], deadline(), false)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReplicaError::Protocol(ProtocolError::UnknownChunk(9))
    ));
    assert!(list_files(tmp.path()).is_empty());
}

// =============================================================================
// Retention enabled
// =============================================================================

#[tokio::test]
async fn test_archive_is_exact_copy_of_input() {
    let tmp = TempDir::new().unwrap();
    let stream = ChangesetBuilder::new(7, 8)
        .base_file("spelling", b'B', b"spelling base")
        .blocks("spelling", 8, &[(0, b"01234567"), (4, b"89abcdef")])
        .finish(9);

    let applied = replicator(tmp.path(), 3)
        .apply(&mut &stream[..], deadline(), false)
        .await
        .unwrap();

    let archived = std::fs::read(tmp.path().join(archive_file_name(7))).unwrap();
    assert_eq!(archived, stream.to_vec());
    assert_eq!(applied.stats.bytes_archived, stream.len() as u64);
    assert_eq!(applied.stats.bytes_consumed, stream.len() as u64);
}

#[tokio::test]
async fn test_archive_kept_after_failure() {
    let tmp = TempDir::new().unwrap();
    let good = ChangesetBuilder::new(7, 8)
        .blocks("synonym", 4, &[(0, b"ssss")])
        .unfinished();
    let mut stream = good.to_vec();
    stream.push(5);

    let err = replicator(tmp.path(), 1)
        .apply(&mut &stream[..], deadline(), false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReplicaError::Protocol(ProtocolError::UnknownChunk(5))
    ));

    // Everything up to the last fully parsed item is kept.
    let archived = std::fs::read(tmp.path().join(archive_file_name(7))).unwrap();
    assert_eq!(archived, good.to_vec());
}

#[tokio::test]
async fn test_archive_replaced_on_reapply() {
    let tmp = TempDir::new().unwrap();
    let long = ChangesetBuilder::new(2, 3)
        .blocks("record", 16, &[(0, &[1u8; 16]), (1, &[2u8; 16])])
        .finish(3);
    let short = ChangesetBuilder::new(2, 3).finish(3);

    let replicator = replicator(tmp.path(), 2);
    replicator
        .apply(&mut &long[..], deadline(), false)
        .await
        .unwrap();
    replicator
        .apply(&mut &short[..], deadline(), false)
        .await
        .unwrap();

    let archived = std::fs::read(tmp.path().join(archive_file_name(2))).unwrap();
    assert_eq!(archived, short.to_vec());
}

#[tokio::test]
#[serial]
async fn test_retention_from_environment() {
    let tmp = TempDir::new().unwrap();
    std::env::set_var(tablerepl::MAX_CHANGESETS_ENV, "4");
    let config = ReplicatorConfig::from_env();
    std::env::remove_var(tablerepl::MAX_CHANGESETS_ENV);
    assert_eq!(config.max_changesets, 4);

    let stream = ChangesetBuilder::new(11, 12).finish(12);
    Replicator::new(tmp.path(), config, UnknownRevision)
        .apply(&mut &stream[..], deadline(), false)
        .await
        .unwrap();
    assert_eq!(list_files(tmp.path()), vec!["changes11"]);
}
