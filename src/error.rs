//! Error taxonomy for the parsing engine.
//!
//! Decoders surface errors to their callers; traversal aborts at the
//! first unrecoverable error. The node validator is the one component
//! that accumulates findings instead of raising.

use apfs_types::{Oid, Xid};
use deku::DekuError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Buffer shorter than the minimum declared for the record.
    #[error("buffer holds {actual} bytes, record needs at least {needed}")]
    InsufficientData { needed: usize, actual: usize },

    /// A fixed magic constant did not match.
    #[error("bad magic {found:#010x}, expected {expected:#010x}")]
    BadMagic { expected: u32, found: u32 },

    /// The decoded object type is not what the decoder handles.
    #[error("object type {found:#06x} where {expected:#06x} was required")]
    WrongObjectType { expected: u32, found: u32 },

    /// Fletcher-64 over the block does not reproduce the stored checksum.
    #[error("checksum mismatch on object {oid:#x} (xid {xid:#x})")]
    ChecksumMismatch { oid: Oid, xid: Xid },

    /// A structural invariant does not hold.
    #[error("malformed structure: {0}")]
    Malformed(String),

    /// A lookup could not locate its key.
    #[error("key not found")]
    NotFound,

    /// A caller-supplied index is past the array it addresses.
    #[error("index {index} out of range for {what} of length {len}")]
    OutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    /// An on-disk value carries a kind tag that is never valid on disk.
    #[error("kind tag {0:#x} is not valid on disk")]
    InvalidKind(u8),

    /// A descent revisited an object already on the current path.
    #[error("cycle detected while descending through object {0:#x}")]
    CycleDetected(Oid),

    /// The block source failed.
    #[error("block source: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DekuError> for Error {
    fn from(err: DekuError) -> Self {
        Error::Malformed(err.to_string())
    }
}
