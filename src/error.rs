use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Terminal conditions found while decoding a changeset stream.
///
/// None of these are retried inside an apply; the caller restarts the
/// whole transfer from its last confirmed revision.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid changeset magic string")]
    BadMagic,

    #[error("unsupported changeset version {0}")]
    UnsupportedVersion(u64),

    #[error("couldn't read a valid {0} from changeset")]
    MalformedInteger(&'static str),

    #[error("unexpected end of changeset while reading {0}")]
    Truncated(&'static str),

    #[error("timed out waiting for changeset data ({0})")]
    Timeout(&'static str),

    #[error("end revision {end} in changeset is not later than start revision {start}")]
    RevisionOrder { start: u64, end: u64 },

    #[error("unsupported changeset type {0}")]
    UnsupportedPayloadKind(u8),

    #[error("changeset is for revision {changeset}, but replica is at revision {current}")]
    WrongRevision { changeset: u64, current: u64 },

    #[error("unrecognised item type {0} in changeset")]
    UnknownChunk(u8),

    #[error("missing tablename in changeset")]
    MissingTableName,

    #[error("invalid character in tablename {0:?} in changeset")]
    InvalidTableName(String),

    #[error("invalid base file letter {0:#04x} in changeset")]
    InvalidBaseLetter(u8),

    #[error("{what} of {size} bytes exceeds the maximum of {max}")]
    PayloadTooLarge {
        what: &'static str,
        size: u64,
        max: u64,
    },

    #[error("block {index} with block size {block_size} lies beyond addressable offsets")]
    BlockOffsetOverflow { index: u64, block_size: u64 },

    #[error("required revision {required} in changeset is earlier than end revision {end}")]
    RequiredRevisionTooEarly { required: u64, end: u64 },

    #[error("junk found at end of changeset ({0} bytes)")]
    TrailingJunk(usize),

    #[error("invalid revision string")]
    InvalidRevision,
}

#[derive(Error, Debug)]
pub enum ReplicaError {
    #[error("changeset rejected: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{action} {}: {source}", path.display())]
    Storage {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to lock {}: {explanation}", path.display())]
    Lock { path: PathBuf, explanation: String },

    #[error("failed to read current revision of {}: {detail}", path.display())]
    Revision { path: PathBuf, detail: String },

    #[error("connection failed while reading changeset: {0}")]
    Transport(#[source] io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ReplicaError {
    pub(crate) fn storage(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        ReplicaError::Storage {
            action,
            path: path.into(),
            source,
        }
    }

    /// True for malformed, truncated, or timed-out streams.
    pub fn is_protocol(&self) -> bool {
        matches!(self, ReplicaError::Protocol(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ReplicaError::Protocol(ProtocolError::Timeout(_)))
    }

    /// OS error code of an underlying storage failure, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            ReplicaError::Storage { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReplicaError>;
