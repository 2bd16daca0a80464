#![forbid(unsafe_code)]

//! Core APFS container types described by the Apple File System Reference.
//!
//! Every structure here models on-disk bytes and derives [`deku`] readers
//! and writers parameterized by byte order. APFS is little-endian on disk,
//! so all types default to little-endian via `ctx_default`; decoding with
//! an explicit [`Endian`] is available for test symmetry and hypothetical
//! big-endian dumps.
//!
//! The crate is layout and arithmetic only: no I/O, no checksum
//! verification, no tree walking. Those live in the engine crate on top.

pub mod btree;
pub mod container;
pub mod encryption;
pub mod extent;
pub mod object;
pub mod omap;
pub mod spaceman;

/// Byte order accepted by every decoder in this crate.
pub use deku::ctx::Endian;

pub use object::{Oid, Paddr, Xid};
