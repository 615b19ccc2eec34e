//! Replica-side changeset application.
//!
//! A changeset moves a replica's table files from one revision to the next.
//! It arrives as a single byte stream and is applied as it is read, never
//! fully buffered.
//!
//! # Pipeline
//!
//! ```text
//! connection --> StreamCursor --> Replicator --+--> base-file applier --> <table>.base{A,B}
//!                     |                        +--> block applier ------> <table>.DB
//!                     +--> ArchiveSink (changes<start_rev>, optional)
//! ```
//!
//! See [`protocol`] for the wire format.

pub mod applier;
pub mod archive;
pub mod base;
pub mod blocks;
pub mod cursor;
pub mod protocol;

pub use applier::{AppliedChangeset, ApplyStats, Replicator, Stage};
pub use archive::{archive_file_name, ArchiveSink};
pub use base::base_file_path;
pub use blocks::{data_file_path, BlockStats};
pub use cursor::StreamCursor;

pub use protocol::{
    decode_revision, encode_revision, pack_string, pack_uint, unpack_string, unpack_uint,
    BaseLetter, ChangesetHeader, ChunkType, Decoded, CHANGES_MAGIC, CHANGES_VERSION,
    MAX_PAYLOAD_SIZE, MAX_TABLE_NAME_SIZE, PAYLOAD_KIND_DANGEROUS, PAYLOAD_KIND_SAFE,
};
