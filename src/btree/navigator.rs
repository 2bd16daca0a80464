//! Node fetch and cache.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use apfs_types::Endian;
use apfs_types::object::Oid;
use log::debug;

use crate::error::{Error, Result};
use crate::node::BtreeNode;
use crate::source::BlockSource;

/// Nodes kept decoded before the oldest is dropped.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Fetches and decodes nodes on demand, keeping a bounded cache keyed
/// by object identifier. Eviction is oldest-insert-first; a forensic
/// scan revisits recent parents far more often than it needs strict
/// recency ordering.
///
/// A navigator is owned by a single caller and is not meant to be
/// shared across threads: the cache is interior state mutated on every
/// lookup. Callers wanting concurrent reads construct one navigator per
/// thread over clones of a cheaply clonable [`BlockSource`]. Decoded
/// nodes are shared out as `Arc` and immutable after decode.
pub struct BtreeNavigator<S: BlockSource> {
    source: S,
    root_oid: Oid,
    endian: Endian,
    capacity: usize,
    cache: HashMap<Oid, Arc<BtreeNode>>,
    order: VecDeque<Oid>,
}

impl<S: BlockSource> BtreeNavigator<S> {
    pub fn new(source: S, root_oid: Oid, endian: Endian) -> Self {
        Self::with_cache_capacity(source, root_oid, endian, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_cache_capacity(
        source: S,
        root_oid: Oid,
        endian: Endian,
        capacity: usize,
    ) -> Self {
        Self {
            source,
            root_oid,
            endian,
            capacity,
            cache: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn root_oid(&self) -> Oid {
        self.root_oid
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Fetch and decode the tree's root node.
    pub fn root(&mut self) -> Result<Arc<BtreeNode>> {
        self.node_by_oid(self.root_oid)
    }

    /// Fetch and decode the node identified by `oid`, from cache when
    /// possible.
    pub fn node_by_oid(&mut self, oid: Oid) -> Result<Arc<BtreeNode>> {
        if let Some(node) = self.cache.get(&oid) {
            debug!("node {oid:#x} served from cache");
            return Ok(Arc::clone(node));
        }
        let block = self.source.read_node(oid)?;
        let node = Arc::new(BtreeNode::decode(&block, self.endian)?);
        self.remember(oid, Arc::clone(&node));
        Ok(node)
    }

    /// Fetch the child at table index `index` of a non-leaf node.
    pub fn child(&mut self, parent: &BtreeNode, index: usize) -> Result<Arc<BtreeNode>> {
        if parent.is_leaf() {
            return Err(Error::Malformed(format!(
                "node {:#x} is a leaf and has no children",
                parent.oid()
            )));
        }
        let child_oid = parent.child_oid(index)?;
        self.node_by_oid(child_oid)
    }

    /// Height of the tree: the root's level plus one.
    pub fn height(&mut self) -> Result<u16> {
        Ok(self.root()?.level() + 1)
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.order.clear();
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    fn remember(&mut self, oid: Oid, node: Arc<BtreeNode>) {
        if self.capacity == 0 {
            return;
        }
        while self.cache.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    debug!("evicting node {oldest:#x}");
                    self.cache.remove(&oldest);
                }
                None => break,
            }
        }
        self.cache.insert(oid, node);
        self.order.push_back(oid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::two_level_tree;

    #[test]
    fn root_and_children_resolve_through_the_source() {
        let fixture = two_level_tree(&[vec![1, 2, 3], vec![10, 11], vec![20]]);
        let mut navigator = BtreeNavigator::new(fixture.source, fixture.root_oid, Endian::Little);

        let root = navigator.root().unwrap();
        assert!(root.is_root());
        assert_eq!(root.key_count(), 3);
        assert_eq!(navigator.height().unwrap(), 2);

        let middle = navigator.child(&root, 1).unwrap();
        assert!(middle.is_leaf());
        assert_eq!(middle.oid(), fixture.leaf_oids[1]);
        assert_eq!(middle.key_count(), 2);
    }

    #[test]
    fn child_of_a_leaf_is_refused() {
        let fixture = two_level_tree(&[vec![1], vec![5]]);
        let mut navigator = BtreeNavigator::new(fixture.source, fixture.root_oid, Endian::Little);
        let root = navigator.root().unwrap();
        let leaf = navigator.child(&root, 0).unwrap();
        assert!(matches!(
            navigator.child(&leaf, 0),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn cache_serves_repeat_lookups_and_clears() {
        let fixture = two_level_tree(&[vec![1], vec![5]]);
        let mut navigator = BtreeNavigator::new(fixture.source, fixture.root_oid, Endian::Little);

        navigator.root().unwrap();
        assert_eq!(navigator.cache_size(), 1);
        navigator.root().unwrap();
        assert_eq!(navigator.cache_size(), 1);

        let root = navigator.root().unwrap();
        navigator.child(&root, 0).unwrap();
        assert_eq!(navigator.cache_size(), 2);

        navigator.clear_cache();
        assert_eq!(navigator.cache_size(), 0);
        navigator.root().unwrap();
        assert_eq!(navigator.cache_size(), 1);
    }

    #[test]
    fn cache_stays_within_its_bound() {
        let fixture = two_level_tree(&[vec![1], vec![5], vec![9], vec![12]]);
        let mut navigator = BtreeNavigator::with_cache_capacity(
            fixture.source,
            fixture.root_oid,
            Endian::Little,
            2,
        );
        let root = navigator.root().unwrap();
        for index in 0..4 {
            navigator.child(&root, index).unwrap();
        }
        assert!(navigator.cache_size() <= 2);
    }

    #[test]
    fn missing_blocks_surface_the_source_error() {
        let fixture = two_level_tree(&[vec![1]]);
        let mut navigator = BtreeNavigator::new(fixture.source, 0xdead, Endian::Little);
        assert!(matches!(navigator.root(), Err(Error::Io(_))));
    }
}
