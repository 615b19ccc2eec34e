//! Base-file chunks: whole-file replacement of a table's `.baseA`/`.baseB`.

use crate::changeset::cursor::StreamCursor;
use crate::changeset::protocol::{BaseLetter, MAX_PAYLOAD_SIZE};
use crate::error::{ProtocolError, ReplicaError, Result};
use crate::temp_file::TempFileGuard;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};

pub fn base_file_path(dir: &Path, table: &str, letter: BaseLetter) -> PathBuf {
    dir.join(format!("{}.base{}", table, letter.as_char()))
}

fn temp_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{}.tmp", table))
}

/// Apply one base-file chunk. The table name has already been read.
///
/// Returns the number of content bytes written.
pub async fn apply_base_file<R: AsyncRead + Unpin>(
    cursor: &mut StreamCursor<'_, R>,
    dir: &Path,
    table: &str,
) -> Result<u64> {
    let letter = BaseLetter::from_u8(cursor.read_u8("base file letter").await?)?;
    let size = cursor.read_uint("base file size").await?;
    if size > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            what: "base file",
            size,
            max: MAX_PAYLOAD_SIZE,
        }
        .into());
    }

    let content = cursor.take(size as usize, "base file contents").await?;

    let tmp_path = temp_path(dir, table);
    let guard = TempFileGuard::new(&tmp_path);
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .await
        .map_err(|e| ReplicaError::storage("failed to open", &tmp_path, e))?;
    file.write_all(&content)
        .await
        .map_err(|e| ReplicaError::storage("failed to write", &tmp_path, e))?;
    file.flush()
        .await
        .map_err(|e| ReplicaError::storage("failed to write", &tmp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| ReplicaError::storage("failed to sync", &tmp_path, e))?;
    drop(file);

    let base_path = base_file_path(dir, table, letter);
    rename_into_place(&tmp_path, &base_path).await?;
    guard.defuse();

    tracing::debug!(table, letter = %letter.as_char(), size, "replaced base file");
    Ok(size)
}

/// Rename `tmp` onto `target`, tolerating a rename reported as failed
/// after it actually happened.
///
/// Some network filesystems retry a rename after a server restart and
/// report the retry's failure even though the first attempt succeeded.
/// If the temporary file is gone afterwards, the rename is taken to have
/// completed. If it is still there (or cannot be removed for any other
/// reason), the original rename error is returned.
pub(crate) async fn rename_into_place(tmp: &Path, target: &Path) -> Result<()> {
    let rename_err = match fs::rename(tmp, target).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    match fs::remove_file(tmp).await {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(
                "Rename of {} to {} reported failure ({}) but the source is gone; assuming it completed",
                tmp.display(),
                target.display(),
                rename_err
            );
            Ok(())
        }
        _ => Err(ReplicaError::storage(
            "couldn't update base file",
            target,
            rename_err,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::protocol::pack_uint;
    use bytes::{BufMut, BytesMut};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::Instant;

    fn chunk(letter: u8, content: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(letter);
        pack_uint(&mut buf, content.len() as u64);
        buf.put_slice(content);
        buf
    }

    async fn apply(dir: &Path, data: &[u8]) -> Result<u64> {
        let mut conn = data;
        let mut cursor = StreamCursor::new(&mut conn, Instant::now() + Duration::from_secs(5));
        apply_base_file(&mut cursor, dir, "record").await
    }

    #[tokio::test]
    async fn test_writes_base_file() {
        let tmp = TempDir::new().unwrap();
        let n = apply(tmp.path(), &chunk(b'B', b"metadata")).await.unwrap();
        assert_eq!(n, 8);
        assert_eq!(
            std::fs::read(tmp.path().join("record.baseB")).unwrap(),
            b"metadata"
        );
        assert!(!tmp.path().join("record.tmp").exists());
        assert!(!tmp.path().join("record.baseA").exists());
    }

    #[tokio::test]
    async fn test_reapplying_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let data = chunk(b'A', b"snapshot-v2");
        apply(tmp.path(), &data).await.unwrap();
        let once = std::fs::read(tmp.path().join("record.baseA")).unwrap();
        apply(tmp.path(), &data).await.unwrap();
        let twice = std::fs::read(tmp.path().join("record.baseA")).unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_replaces_existing_content() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("record.baseA"), b"a much longer old snapshot").unwrap();
        apply(tmp.path(), &chunk(b'A', b"new")).await.unwrap();
        assert_eq!(
            std::fs::read(tmp.path().join("record.baseA")).unwrap(),
            b"new"
        );
    }

    #[tokio::test]
    async fn test_rejects_bad_letter() {
        let tmp = TempDir::new().unwrap();
        let err = apply(tmp.path(), &chunk(b'C', b"x")).await.unwrap_err();
        assert!(matches!(
            err,
            ReplicaError::Protocol(ProtocolError::InvalidBaseLetter(b'C'))
        ));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_short_content_leaves_target_untouched() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("record.baseA"), b"old").unwrap();
        let mut data = chunk(b'A', b"0123456789");
        data.truncate(data.len() - 3);

        let err = apply(tmp.path(), &data).await.unwrap_err();
        assert!(matches!(
            err,
            ReplicaError::Protocol(ProtocolError::Truncated(_))
        ));
        assert_eq!(
            std::fs::read(tmp.path().join("record.baseA")).unwrap(),
            b"old"
        );
        assert!(!tmp.path().join("record.tmp").exists());
    }

    #[tokio::test]
    async fn test_oversized_declaration() {
        let tmp = TempDir::new().unwrap();
        let mut data = BytesMut::new();
        data.put_u8(b'A');
        pack_uint(&mut data, MAX_PAYLOAD_SIZE + 1);
        let err = apply(tmp.path(), &data).await.unwrap_err();
        assert!(matches!(
            err,
            ReplicaError::Protocol(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_rename_with_vanished_source_counts_as_done() {
        // The temporary file is already gone, as it would be if a previous
        // rename completed on the server before the failure was reported.
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("record.tmp");
        let target = tmp.path().join("record.baseA");
        std::fs::write(&target, b"renamed earlier").unwrap();

        rename_into_place(&source, &target).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"renamed earlier");
    }

    #[tokio::test]
    async fn test_rename_failure_with_source_present_is_error() {
        // Renaming a file onto an existing directory fails, and the source
        // is still there to remove, so the failure is real.
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("record.tmp");
        let target = tmp.path().join("record.baseA");
        std::fs::write(&source, b"content").unwrap();
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("occupant"), b"x").unwrap();

        let err = rename_into_place(&source, &target).await.unwrap_err();
        match err {
            ReplicaError::Storage { action, path, .. } => {
                assert_eq!(action, "couldn't update base file");
                assert_eq!(path, target);
            }
            other => panic!("expected storage error, got {:?}", other),
        }
        assert!(!source.exists());
    }
}
