//! Block chunks: in-place overwrite of fixed-size blocks in a table's `.DB` file.

use crate::changeset::cursor::StreamCursor;
use crate::changeset::protocol::MAX_PAYLOAD_SIZE;
use crate::error::{ProtocolError, ReplicaError, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt, SeekFrom};

pub fn data_file_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{}.DB", table))
}

/// Counters for one block chunk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockStats {
    pub blocks: u64,
    pub bytes: u64,
}

/// Open the data file for writing, creating it only if it does not exist.
async fn open_data_file(path: &Path) -> Result<File> {
    match OpenOptions::new().write(true).open(path).await {
        Ok(file) => Ok(file),
        Err(open_err) => {
            if fs::try_exists(path).await.unwrap_or(true) {
                return Err(ReplicaError::storage("failed to open", path, open_err));
            }
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .await
                .map_err(|e| ReplicaError::storage("failed to create and open", path, e))
        }
    }
}

/// Apply one block chunk. The table name has already been read.
///
/// Blocks are written in stream order, so a later block with the same index
/// wins. The file is synced once, after the terminating index.
pub async fn apply_blocks<R: AsyncRead + Unpin>(
    cursor: &mut StreamCursor<'_, R>,
    dir: &Path,
    table: &str,
) -> Result<BlockStats> {
    let block_size = cursor.read_uint("blocksize").await?;
    if block_size > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            what: "block",
            size: block_size,
            max: MAX_PAYLOAD_SIZE,
        }
        .into());
    }
    cursor.commit().await?;

    let path = data_file_path(dir, table);
    let mut file = open_data_file(&path).await?;
    let mut stats = BlockStats::default();

    loop {
        let tag = cursor.read_uint("block number").await?;
        if tag == 0 {
            cursor.commit().await?;
            break;
        }
        let index = tag - 1;
        let offset = index
            .checked_mul(block_size)
            .ok_or(ProtocolError::BlockOffsetOverflow { index, block_size })?;

        let block = cursor.take(block_size as usize, "block contents").await?;

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| ReplicaError::storage("failed to seek in", &path, e))?;
        file.write_all(&block)
            .await
            .map_err(|e| ReplicaError::storage("failed to write block to", &path, e))?;

        tracing::trace!(table, index, "wrote block");
        stats.blocks += 1;
        stats.bytes += block_size;
    }

    file.flush()
        .await
        .map_err(|e| ReplicaError::storage("failed to write block to", &path, e))?;
    file.sync_all()
        .await
        .map_err(|e| ReplicaError::storage("failed to sync", &path, e))?;

    tracing::debug!(table, blocks = stats.blocks, block_size, "applied blocks");
    Ok(stats)
}
