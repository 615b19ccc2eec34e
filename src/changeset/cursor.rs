//! Incremental reader over a changeset byte stream.
//!
//! Bytes are pulled from the transport into a growable buffer. Decoding
//! advances a read position; `commit` hands everything before the position
//! to the archive sink and drops it from the buffer. Nothing is decoded
//! past what has actually been received.

use crate::changeset::archive::ArchiveSink;
use crate::changeset::protocol::{self, Decoded, REASONABLE_CHANGESET_SIZE};
use crate::error::{ProtocolError, ReplicaError, Result};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout_at, Instant};

pub struct StreamCursor<'a, R> {
    conn: &'a mut R,
    deadline: Instant,
    buf: BytesMut,
    pos: usize,
    eof: bool,
    archive: ArchiveSink,
    consumed: u64,
}

impl<'a, R: AsyncRead + Unpin> StreamCursor<'a, R> {
    pub fn new(conn: &'a mut R, deadline: Instant) -> Self {
        Self {
            conn,
            deadline,
            buf: BytesMut::with_capacity(REASONABLE_CHANGESET_SIZE),
            pos: 0,
            eof: false,
            archive: ArchiveSink::disabled(),
            consumed: 0,
        }
    }

    /// Bytes received but not yet decoded.
    fn available(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Total bytes consumed from the stream so far, committed or not.
    pub fn consumed(&self) -> u64 {
        self.consumed + self.pos as u64
    }

    /// Bytes written to the archive so far.
    pub fn archived(&self) -> u64 {
        self.archive.bytes_written()
    }

    pub fn attach_archive(&mut self, archive: ArchiveSink) {
        self.archive = archive;
    }

    /// Read whatever the transport has next. Returns `false` at end of stream.
    async fn fill(&mut self, what: &'static str) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        self.buf.reserve(REASONABLE_CHANGESET_SIZE);
        let n = timeout_at(self.deadline, self.conn.read_buf(&mut self.buf))
            .await
            .map_err(|_| ProtocolError::Timeout(what))?
            .map_err(ReplicaError::Transport)?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n > 0)
    }

    /// Wait until at least `n` undecoded bytes are buffered.
    pub async fn ensure(&mut self, n: usize, what: &'static str) -> Result<()> {
        while self.available() < n {
            if !self.fill(what).await? {
                return Err(ProtocolError::Truncated(what).into());
            }
        }
        Ok(())
    }

    /// Buffer up to `n` bytes without requiring the stream to be that long.
    pub async fn read_ahead(&mut self, n: usize, what: &'static str) -> Result<()> {
        while self.available() < n {
            if !self.fill(what).await? {
                break;
            }
        }
        Ok(())
    }

    /// Consume `prefix` if the undecoded bytes start with it.
    pub fn skip_prefix(&mut self, prefix: &[u8]) -> bool {
        if self.buf[self.pos..].starts_with(prefix) {
            self.pos += prefix.len();
            true
        } else {
            false
        }
    }

    pub async fn read_u8(&mut self, what: &'static str) -> Result<u8> {
        self.ensure(1, what).await?;
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    pub async fn read_uint(&mut self, what: &'static str) -> Result<u64> {
        loop {
            match protocol::unpack_uint(&self.buf[self.pos..]) {
                Decoded::Value { value, len } => {
                    self.pos += len;
                    return Ok(value);
                }
                Decoded::Malformed => return Err(ProtocolError::MalformedInteger(what).into()),
                Decoded::NeedMore => {
                    if !self.fill(what).await? {
                        return Err(ProtocolError::Truncated(what).into());
                    }
                }
            }
        }
    }

    /// Read a length-prefixed string of at most `max` bytes.
    ///
    /// The declared length is checked before waiting for the body.
    pub async fn read_string(&mut self, what: &'static str, max: u64) -> Result<Vec<u8>> {
        loop {
            if let Decoded::Value { value: size, .. } =
                protocol::unpack_uint(&self.buf[self.pos..])
            {
                if size > max {
                    return Err(ProtocolError::PayloadTooLarge { what, size, max }.into());
                }
            }
            match protocol::unpack_string(&self.buf[self.pos..]) {
                Decoded::Value { value, len } => {
                    let value = value.to_vec();
                    self.pos += len;
                    return Ok(value);
                }
                Decoded::Malformed => return Err(ProtocolError::MalformedInteger(what).into()),
                Decoded::NeedMore => {
                    if !self.fill(what).await? {
                        return Err(ProtocolError::Truncated(what).into());
                    }
                }
            }
        }
    }

    /// Take exactly `n` bytes off the stream.
    ///
    /// Pending bytes and the returned bytes are archived before this returns.
    pub async fn take(&mut self, n: usize, what: &'static str) -> Result<Bytes> {
        self.commit().await?;
        self.ensure(n, what).await?;
        let data = self.buf.split_to(n).freeze();
        self.archive.append(&data).await?;
        self.consumed += n as u64;
        Ok(data)
    }

    /// Archive and discard everything decoded so far.
    pub async fn commit(&mut self) -> Result<()> {
        if self.pos == 0 {
            return Ok(());
        }
        let done = self.buf.split_to(self.pos);
        self.pos = 0;
        self.consumed += done.len() as u64;
        self.archive.append(&done).await
    }

    /// Read until end of stream, failing on any byte past the last decoded one.
    ///
    /// Bounded by the deadline like every other read.
    pub async fn expect_end(&mut self) -> Result<()> {
        loop {
            let junk = self.available();
            if junk > 0 {
                return Err(ProtocolError::TrailingJunk(junk).into());
            }
            if !self.fill("end of changeset").await? {
                return Ok(());
            }
        }
    }

    /// Flush and sync the archive file, if one is attached.
    pub async fn close_archive(&mut self) -> Result<()> {
        std::mem::replace(&mut self.archive, ArchiveSink::disabled())
            .finish()
            .await
    }
}
