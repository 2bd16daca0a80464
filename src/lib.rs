#![forbid(unsafe_code)]

//! Read-only forensic parsing for APFS container structures.
//!
//! Given blocks from a container image, this crate decodes the object
//! headers, B-tree nodes, space-manager records, and encryption-rolling
//! state that hold the container's metadata, and navigates the
//! copy-on-write B-trees that nearly everything lives in. It never
//! writes, repairs, mounts, or decrypts; the goal is to answer
//! questions about what is on disk, with checksums verified and
//! structural damage reported rather than papered over.
//!
//! The stack is layered: primitive endian reads ([`reader`]), the
//! object header and Fletcher-64 checksum ([`checksum`], [`object`]),
//! typed record decoders ([`records`] over the `apfs-types` layouts),
//! the B-tree node engine ([`node`]), tree navigation and analysis
//! ([`btree`]), the space-manager walker ([`spaceman`]), and the node
//! validator ([`validator`]). Blocks come from a [`source::BlockSource`]
//! supplied by the caller.

pub mod btree;
pub mod checksum;
pub mod error;
pub mod node;
pub mod object;
pub mod reader;
pub mod records;
pub mod source;
pub mod spaceman;
pub mod validator;

#[cfg(test)]
pub(crate) mod testutil;

pub use apfs_types::Endian;
pub use error::{Error, Result};
