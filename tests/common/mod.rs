//! Shared helpers for building changeset streams in tests.

#![allow(dead_code)]

use bytes::{BufMut, Bytes, BytesMut};
use tablerepl::changeset::{pack_string, pack_uint, ChangesetHeader};

/// Builds a changeset stream chunk by chunk.
pub struct ChangesetBuilder {
    buf: BytesMut,
}

impl ChangesetBuilder {
    pub fn new(start: u64, end: u64) -> Self {
        let mut buf = BytesMut::new();
        ChangesetHeader::new(start, end).encode(&mut buf);
        Self { buf }
    }

    pub fn with_header(header: ChangesetHeader) -> Self {
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        Self { buf }
    }

    pub fn base_file(mut self, table: &str, letter: u8, content: &[u8]) -> Self {
        self.buf.put_u8(1);
        pack_string(&mut self.buf, table.as_bytes());
        self.buf.put_u8(letter);
        pack_uint(&mut self.buf, content.len() as u64);
        self.buf.put_slice(content);
        self
    }

    pub fn blocks(mut self, table: &str, block_size: u64, blocks: &[(u64, &[u8])]) -> Self {
        self.buf.put_u8(2);
        pack_string(&mut self.buf, table.as_bytes());
        pack_uint(&mut self.buf, block_size);
        for (index, data) in blocks {
            pack_uint(&mut self.buf, index + 1);
            self.buf.put_slice(data);
        }
        pack_uint(&mut self.buf, 0);
        self
    }

    /// Append arbitrary bytes, e.g. an unknown chunk tag.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.put_slice(bytes);
        self
    }

    /// Terminate the chunk list and append the required revision.
    pub fn finish(mut self, required: u64) -> Bytes {
        self.buf.put_u8(0);
        pack_uint(&mut self.buf, required);
        self.buf.freeze()
    }

    /// The stream so far, without a terminator or footer.
    pub fn unfinished(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Files in `dir`, sorted, excluding the lock file.
pub fn list_files(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name != tablerepl::lock::LOCK_FILE_NAME)
        .collect();
    names.sort();
    names
}
