//! Changeset driver.
//!
//! Applies one changeset read from a connection to a replica directory:
//! lock, header, revision check, chunks, footer. Any failure aborts the
//! apply at once; the caller decides whether to retry the transfer.

use crate::changeset::archive::ArchiveSink;
use crate::changeset::base::apply_base_file;
use crate::changeset::blocks::apply_blocks;
use crate::changeset::cursor::StreamCursor;
use crate::changeset::protocol::{
    encode_revision, parse_table_name, ChangesetHeader, ChunkType, CHANGES_MAGIC,
    CHANGES_VERSION, MAX_TABLE_NAME_SIZE, PAYLOAD_KIND_SAFE,
};
use crate::config::ReplicatorConfig;
use crate::error::{ProtocolError, Result};
use crate::lock::DirLock;
use crate::revision::RevisionReader;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;
use tokio::time::Instant;

/// Where an apply is (or was when it failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AwaitingLock,
    ReadingHeader,
    CheckingRevision,
    ReadingChunks,
    ReadingFooter,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::AwaitingLock => "awaiting lock",
            Stage::ReadingHeader => "reading header",
            Stage::CheckingRevision => "checking revision",
            Stage::ReadingChunks => "reading chunks",
            Stage::ReadingFooter => "reading footer",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Statistics for one applied changeset
#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct ApplyStats {
    /// Base files replaced
    pub base_files: u64,

    /// Blocks written across all tables
    pub blocks_written: u64,

    /// Bytes read from the connection, header through footer
    pub bytes_consumed: u64,

    /// Bytes copied to the archive file (zero when archival is off)
    pub bytes_archived: u64,
}

/// Result of a successful apply.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AppliedChangeset {
    pub start_revision: u64,
    pub end_revision: u64,

    /// Revision the replica must reach before it is consistent again.
    /// Equal to `end_revision` unless further changesets are needed.
    pub required_revision: u64,

    pub stats: ApplyStats,
}

impl AppliedChangeset {
    /// The required revision in wire encoding, as handed back to callers.
    pub fn encoded_required_revision(&self) -> Bytes {
        encode_revision(self.required_revision)
    }
}

/// Applies changesets to one replica directory.
pub struct Replicator {
    dir: PathBuf,
    config: ReplicatorConfig,
    revisions: Box<dyn RevisionReader>,
}

impl Replicator {
    pub fn new(
        dir: impl Into<PathBuf>,
        config: ReplicatorConfig,
        revisions: impl RevisionReader + 'static,
    ) -> Self {
        Self {
            dir: dir.into(),
            config,
            revisions: Box::new(revisions),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &ReplicatorConfig {
        &self.config
    }

    /// Apply one changeset and return the encoded required revision.
    pub async fn apply_changeset_from_conn<R: AsyncRead + Unpin>(
        &self,
        conn: &mut R,
        deadline: Instant,
        trusted: bool,
    ) -> Result<Bytes> {
        let applied = self.apply(conn, deadline, trusted).await?;
        Ok(applied.encoded_required_revision())
    }

    /// Apply one changeset read from `conn`.
    ///
    /// `trusted` says the replica's current state is known-good, so its
    /// revision can be checked against the changeset's start revision.
    /// Every read must complete before `deadline`.
    pub async fn apply<R: AsyncRead + Unpin>(
        &self,
        conn: &mut R,
        deadline: Instant,
        trusted: bool,
    ) -> Result<AppliedChangeset> {
        let mut stage = Stage::AwaitingLock;
        let result = self.run(conn, deadline, trusted, &mut stage).await;
        match &result {
            Ok(applied) => tracing::info!(
                db = %self.dir.display(),
                start = applied.start_revision,
                end = applied.end_revision,
                required = applied.required_revision,
                base_files = applied.stats.base_files,
                blocks = applied.stats.blocks_written,
                bytes = applied.stats.bytes_consumed,
                "applied changeset"
            ),
            Err(e) => tracing::warn!(
                db = %self.dir.display(),
                %stage,
                "changeset apply failed: {}",
                e
            ),
        }
        result
    }

    async fn run<R: AsyncRead + Unpin>(
        &self,
        conn: &mut R,
        deadline: Instant,
        trusted: bool,
        stage: &mut Stage,
    ) -> Result<AppliedChangeset> {
        let _lock = DirLock::acquire(&self.dir)?;

        let mut cursor = StreamCursor::new(conn, deadline);
        let outcome = self.drive(&mut cursor, trusted, stage).await;
        // Keep whatever was archived, even from a failed apply.
        let closed = cursor.close_archive().await;

        let mut applied = outcome?;
        closed?;
        applied.stats.bytes_consumed = cursor.consumed();
        *stage = Stage::Done;
        Ok(applied)
    }

    async fn drive<R: AsyncRead + Unpin>(
        &self,
        cursor: &mut StreamCursor<'_, R>,
        trusted: bool,
        stage: &mut Stage,
    ) -> Result<AppliedChangeset> {
        *stage = Stage::ReadingHeader;
        let header = read_header(cursor).await?;
        tracing::debug!(
            start = header.start_revision,
            end = header.end_revision,
            "read changeset header"
        );

        let archive =
            ArchiveSink::create(&self.dir, header.start_revision, self.config.max_changesets)
                .await?;
        cursor.attach_archive(archive);
        cursor.commit().await?;

        *stage = Stage::CheckingRevision;
        self.check_revision(header.start_revision, trusted)?;

        *stage = Stage::ReadingChunks;
        let mut stats = ApplyStats::default();
        loop {
            let tag = cursor.read_u8("chunk type").await?;
            let chunk = ChunkType::from_u8(tag).ok_or(ProtocolError::UnknownChunk(tag))?;
            if chunk == ChunkType::End {
                break;
            }

            let name = cursor.read_string("tablename", MAX_TABLE_NAME_SIZE).await?;
            let table = parse_table_name(&name)?;
            cursor.commit().await?;

            match chunk {
                ChunkType::BaseFile => {
                    apply_base_file(cursor, &self.dir, &table).await?;
                    stats.base_files += 1;
                }
                ChunkType::Blocks => {
                    let blocks = apply_blocks(cursor, &self.dir, &table).await?;
                    stats.blocks_written += blocks.blocks;
                }
                ChunkType::End => unreachable!("end chunk handled above"),
            }
        }

        *stage = Stage::ReadingFooter;
        let required_revision = cursor.read_uint("required revision").await?;
        if required_revision < header.end_revision {
            return Err(ProtocolError::RequiredRevisionTooEarly {
                required: required_revision,
                end: header.end_revision,
            }
            .into());
        }
        cursor.expect_end().await?;
        cursor.commit().await?;

        Ok(AppliedChangeset {
            start_revision: header.start_revision,
            end_revision: header.end_revision,
            required_revision,
            stats: ApplyStats {
                bytes_archived: cursor.archived(),
                ..stats
            },
        })
    }

    fn check_revision(&self, start_revision: u64, trusted: bool) -> Result<()> {
        if !trusted {
            // An interrupted earlier apply may have left the tables in a
            // state whose revision cannot be read reliably.
            tracing::debug!("replica state not trusted, skipping revision check");
            return Ok(());
        }
        let current = self.revisions.current_revision(&self.dir)?;
        if current != start_revision {
            return Err(ProtocolError::WrongRevision {
                changeset: start_revision,
                current,
            }
            .into());
        }
        Ok(())
    }
}

/// Read and validate the header. Consumed bytes stay pending in the cursor
/// so they can be archived once the archive exists.
async fn read_header<R: AsyncRead + Unpin>(
    cursor: &mut StreamCursor<'_, R>,
) -> Result<ChangesetHeader> {
    cursor
        .read_ahead(CHANGES_MAGIC.len(), "changeset header")
        .await?;
    if !cursor.skip_prefix(CHANGES_MAGIC) {
        return Err(ProtocolError::BadMagic.into());
    }

    let version = cursor.read_uint("version number").await?;
    if version != CHANGES_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version).into());
    }

    let start_revision = cursor.read_uint("start revision").await?;
    let end_revision = cursor.read_uint("end revision").await?;
    if end_revision <= start_revision {
        return Err(ProtocolError::RevisionOrder {
            start: start_revision,
            end: end_revision,
        }
        .into());
    }

    let payload_kind = cursor.read_u8("changeset type").await?;
    if payload_kind != PAYLOAD_KIND_SAFE {
        return Err(ProtocolError::UnsupportedPayloadKind(payload_kind).into());
    }

    Ok(ChangesetHeader {
        version,
        start_revision,
        end_revision,
        payload_kind,
    })
}
