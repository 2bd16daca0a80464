//! Key search over a whole tree.

use std::cmp::Ordering;

use apfs_types::object::Oid;

use crate::error::{Error, Result};
use crate::node::BtreeNode;
use crate::btree::navigator::BtreeNavigator;
use crate::source::BlockSource;

/// Ordering of raw key bytes. The node layout does not know how its
/// keys compare; trees with structured keys plug in their own comparer.
pub trait KeyComparer {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Plain lexicographic byte comparison, the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparer;

impl KeyComparer for BytewiseComparer {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Descends from the root to answer point and range queries, ordering
/// keys with a pluggable [`KeyComparer`].
pub struct BtreeSearcher<S: BlockSource, C: KeyComparer = BytewiseComparer> {
    navigator: BtreeNavigator<S>,
    comparer: C,
}

impl<S: BlockSource> BtreeSearcher<S, BytewiseComparer> {
    pub fn new(navigator: BtreeNavigator<S>) -> Self {
        Self::with_comparer(navigator, BytewiseComparer)
    }
}

impl<S: BlockSource, C: KeyComparer> BtreeSearcher<S, C> {
    pub fn with_comparer(navigator: BtreeNavigator<S>, comparer: C) -> Self {
        Self { navigator, comparer }
    }

    pub fn navigator_mut(&mut self) -> &mut BtreeNavigator<S> {
        &mut self.navigator
    }

    /// Find the value stored under `key`, descending from the root.
    pub fn find(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        let mut oid = self.navigator.root_oid();
        let mut path: Vec<Oid> = Vec::new();
        loop {
            if path.contains(&oid) {
                return Err(Error::CycleDetected(oid));
            }
            path.push(oid);

            let node = self.navigator.node_by_oid(oid)?;
            if node.is_leaf() {
                let index = match self.position_le(&node, key)? {
                    Some(index) => index,
                    None => return Err(Error::NotFound),
                };
                let entry = node.entry(index)?;
                if self.comparer.compare(entry.key, key) != Ordering::Equal {
                    return Err(Error::NotFound);
                }
                return entry.value.map(<[u8]>::to_vec).ok_or(Error::NotFound);
            }

            let index = self.position_le(&node, key)?.ok_or(Error::NotFound)?;
            oid = node.child_oid(index)?;
        }
    }

    /// Whether `key` is present.
    pub fn contains(&mut self, key: &[u8]) -> Result<bool> {
        match self.find(key) {
            Ok(_) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// All entries with `start <= key < end`, ascending in comparer
    /// order.
    pub fn find_range(&mut self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut matches = Vec::new();
        let mut path = Vec::new();
        let root_oid = self.navigator.root_oid();
        self.collect_range(root_oid, start, end, &mut path, &mut matches)?;
        Ok(matches)
    }

    fn collect_range(
        &mut self,
        oid: Oid,
        start: &[u8],
        end: &[u8],
        path: &mut Vec<Oid>,
        matches: &mut Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<()> {
        if path.contains(&oid) {
            return Err(Error::CycleDetected(oid));
        }
        path.push(oid);

        let node = self.navigator.node_by_oid(oid)?;
        if node.is_leaf() {
            for index in 0..node.key_count() {
                let entry = node.entry(index)?;
                if self.comparer.compare(entry.key, start) == Ordering::Less {
                    continue;
                }
                if self.comparer.compare(entry.key, end) != Ordering::Less {
                    break;
                }
                if let Some(value) = entry.value {
                    matches.push((entry.key.to_vec(), value.to_vec()));
                }
            }
        } else {
            // The subtree that may contain `start`, then every sibling
            // whose first key is still below `end`.
            let first = self.position_le(&node, start)?.unwrap_or(0);
            for index in first..node.key_count() {
                if index > first {
                    let entry = node.entry(index)?;
                    if self.comparer.compare(entry.key, end) != Ordering::Less {
                        break;
                    }
                }
                let child = node.child_oid(index)?;
                self.collect_range(child, start, end, path, matches)?;
            }
        }

        path.pop();
        Ok(())
    }

    /// Index of the greatest key not exceeding `key`, or `None` when
    /// every key is greater.
    fn position_le(&self, node: &BtreeNode, key: &[u8]) -> Result<Option<usize>> {
        let mut low: isize = 0;
        let mut high: isize = node.key_count() as isize - 1;
        let mut candidate = None;
        while low <= high {
            let mid = ((low + high) / 2) as usize;
            let entry = node.entry(mid)?;
            match self.comparer.compare(entry.key, key) {
                Ordering::Equal => return Ok(Some(mid)),
                Ordering::Less => {
                    candidate = Some(mid);
                    low = mid as isize + 1;
                }
                Ordering::Greater => high = mid as isize - 1,
            }
        }
        Ok(candidate)
    }
}
