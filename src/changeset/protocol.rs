//! Changeset wire format.
//!
//! ```text
//! header:  MAGIC | uint(version) | uint(start_rev) | uint(end_rev) | u8(payload_kind)
//! chunks:  u8(chunk_type) ... repeated, terminated by chunk_type 0
//!   1 base file: string(table) | u8('A'|'B') | uint(size) | size bytes
//!   2 blocks:    string(table) | uint(block_size) | { uint(index + 1) | block_size bytes }* | uint(0)
//! footer:  uint(required_rev), then end of stream
//! ```
//!
//! `uint` is a little-endian base-128 varint (7 bits per byte, high bit set
//! on every byte but the last). `string` is `uint(len)` followed by `len` bytes.

use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};

/// Marker every changeset starts with.
pub const CHANGES_MAGIC: &[u8] = b"FlintChanges";

/// The only changeset format version this replica understands.
pub const CHANGES_VERSION: u64 = 1;

/// Payload kind for changesets written with full durability.
pub const PAYLOAD_KIND_SAFE: u8 = 0;

/// Payload kind for changesets written in relaxed-durability mode (rejected).
pub const PAYLOAD_KIND_DANGEROUS: u8 = 1;

/// Read-ahead used when the amount of data needed next is not known.
pub const REASONABLE_CHANGESET_SIZE: usize = 1024;

/// Upper bound on a declared base-file size or block size (64MB).
pub const MAX_PAYLOAD_SIZE: u64 = 64 * 1024 * 1024;

/// Upper bound on a declared table name length.
pub const MAX_TABLE_NAME_SIZE: u64 = 255;

// =============================================================================
// Primitive codec
// =============================================================================

/// Outcome of decoding a primitive from the front of a buffer.
///
/// `NeedMore` is not an error: the buffer simply ends before the value does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded<T> {
    Value { value: T, len: usize },
    NeedMore,
    Malformed,
}

/// Decode an unsigned varint from the front of `buf`.
pub fn unpack_uint(buf: &[u8]) -> Decoded<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        let part = u64::from(byte & 0x7f);
        if shift >= 64 || (part << shift) >> shift != part {
            return Decoded::Malformed;
        }
        value |= part << shift;
        if byte & 0x80 == 0 {
            return Decoded::Value { value, len: i + 1 };
        }
        shift += 7;
    }
    Decoded::NeedMore
}

/// Decode a length-prefixed byte string from the front of `buf`.
pub fn unpack_string(buf: &[u8]) -> Decoded<&[u8]> {
    match unpack_uint(buf) {
        Decoded::Value { value, len } => {
            let Ok(size) = usize::try_from(value) else {
                return Decoded::Malformed;
            };
            match len.checked_add(size) {
                Some(end) if end <= buf.len() => Decoded::Value {
                    value: &buf[len..end],
                    len: end,
                },
                Some(_) => Decoded::NeedMore,
                None => Decoded::Malformed,
            }
        }
        Decoded::NeedMore => Decoded::NeedMore,
        Decoded::Malformed => Decoded::Malformed,
    }
}

pub fn pack_uint(buf: &mut BytesMut, mut value: u64) {
    while value > 0x7f {
        buf.put_u8((value & 0x7f) as u8 | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

pub fn pack_string(buf: &mut BytesMut, s: &[u8]) {
    pack_uint(buf, s.len() as u64);
    buf.put_slice(s);
}

/// Encode a revision the way it is exchanged with callers.
pub fn encode_revision(revision: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(10);
    pack_uint(&mut buf, revision);
    buf.freeze()
}

/// Decode a revision previously produced by [`encode_revision`].
///
/// The whole input must be consumed.
pub fn decode_revision(encoded: &[u8]) -> Result<u64, ProtocolError> {
    match unpack_uint(encoded) {
        Decoded::Value { value, len } if len == encoded.len() => Ok(value),
        _ => Err(ProtocolError::InvalidRevision),
    }
}

// =============================================================================
// Header
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangesetHeader {
    pub version: u64,
    pub start_revision: u64,
    pub end_revision: u64,
    pub payload_kind: u8,
}

impl ChangesetHeader {
    pub fn new(start_revision: u64, end_revision: u64) -> Self {
        Self {
            version: CHANGES_VERSION,
            start_revision,
            end_revision,
            payload_kind: PAYLOAD_KIND_SAFE,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(CHANGES_MAGIC);
        pack_uint(buf, self.version);
        pack_uint(buf, self.start_revision);
        pack_uint(buf, self.end_revision);
        buf.put_u8(self.payload_kind);
    }
}

// =============================================================================
// Chunks
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    End = 0,
    BaseFile = 1,
    Blocks = 2,
}

impl ChunkType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::End),
            1 => Some(Self::BaseFile),
            2 => Some(Self::Blocks),
            _ => None,
        }
    }
}

/// Which of a table's two alternating base files a chunk replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseLetter {
    A,
    B,
}

impl BaseLetter {
    pub fn from_u8(b: u8) -> Result<Self, ProtocolError> {
        match b {
            b'A' => Ok(Self::A),
            b'B' => Ok(Self::B),
            other => Err(ProtocolError::InvalidBaseLetter(other)),
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::A => 'A',
            Self::B => 'B',
        }
    }
}

/// Validate a table name: non-empty, `a`-`z` only.
pub fn parse_table_name(raw: &[u8]) -> Result<String, ProtocolError> {
    if raw.is_empty() {
        return Err(ProtocolError::MissingTableName);
    }
    if !raw.iter().all(u8::is_ascii_lowercase) {
        return Err(ProtocolError::InvalidTableName(
            String::from_utf8_lossy(raw).into_owned(),
        ));
    }
    // All bytes are ASCII lowercase, so this cannot fail.
    Ok(raw.iter().map(|&b| b as char).collect())
}

// =============================================================================
// Tests
// =============================================================================
