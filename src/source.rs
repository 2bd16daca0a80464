//! Block sources: where node bytes come from.
//!
//! The engine never does its own I/O; everything above the decoders
//! asks a [`BlockSource`] for the block backing an object identifier.
//! Resolution of virtual and ephemeral identifiers to physical blocks
//! is the caller's concern (parameterized by the object map when
//! needed); the sources shipped here treat the identifier as a
//! physical block address.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use apfs_types::object::Oid;

/// Supplies the bytes of the on-disk node identified by an object
/// identifier. Implementations return exactly one node-size block.
pub trait BlockSource {
    fn read_node(&self, oid: Oid) -> io::Result<Vec<u8>>;
}

/// Blocks held in memory, keyed by object identifier. Used for
/// synthetic images and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockSource {
    blocks: HashMap<Oid, Vec<u8>>,
}

impl MemoryBlockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, oid: Oid, block: Vec<u8>) {
        self.blocks.insert(oid, block);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl BlockSource for MemoryBlockSource {
    fn read_node(&self, oid: Oid) -> io::Result<Vec<u8>> {
        self.blocks.get(&oid).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no block for object {oid:#x}"),
            )
        })
    }
}

/// Positioned reads against a container image file, treating the object
/// identifier as a physical block address. Handles are cheap to clone;
/// one navigator per thread over clones of the same source is the
/// intended sharing model.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct FileBlockSource {
    file: Arc<File>,
    block_size: usize,
}

#[cfg(unix)]
impl FileBlockSource {
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> io::Result<Self> {
        let file = File::options().read(true).open(path)?;
        Ok(Self {
            file: Arc::new(file),
            block_size,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

#[cfg(unix)]
impl BlockSource for FileBlockSource {
    fn read_node(&self, oid: Oid) -> io::Result<Vec<u8>> {
        use std::os::unix::prelude::FileExt;

        let mut block = vec![0u8; self.block_size];
        self.file
            .read_exact_at(&mut block, oid * self.block_size as u64)?;
        Ok(block)
    }
}
