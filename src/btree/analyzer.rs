//! Structural statistics derived by traversal.

use std::collections::BTreeMap;

use apfs_types::btree::{BtreeInfo, BtreeNodePhys};
use itertools::Itertools;

use crate::btree::navigator::BtreeNavigator;
use crate::btree::traverser::BtreeTraverser;
use crate::error::Result;
use crate::node::BtreeNode;
use crate::source::BlockSource;

/// Aggregate description of one tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeStructure {
    pub height: u16,
    pub node_count: usize,
    pub leaf_count: usize,
    pub internal_count: usize,
    pub key_count: u64,
    /// Mean leaf occupancy, 0–100.
    pub fill_factor_pct: f64,
    /// Share of data-area bytes not sitting in free space, 0–100.
    pub storage_efficiency_pct: f64,
}

/// Derives distributions and utilization figures for a whole tree.
pub struct BtreeAnalyzer<S: BlockSource> {
    traverser: BtreeTraverser<S>,
}

impl<S: BlockSource> BtreeAnalyzer<S> {
    pub fn new(navigator: BtreeNavigator<S>) -> Self {
        Self {
            traverser: BtreeTraverser::new(navigator),
        }
    }

    /// Height as reported by the root: its level plus one.
    pub fn height(&mut self) -> Result<u16> {
        self.traverser.navigator_mut().height()
    }

    /// Count of nodes per level, leaves at level zero.
    pub fn node_distribution(&mut self) -> Result<BTreeMap<u16, usize>> {
        let mut levels = Vec::new();
        self.traverser.pre_order(&mut |node, _depth| {
            levels.push(node.level());
            Ok(true)
        })?;
        Ok(levels.into_iter().counts().into_iter().collect())
    }

    /// Total keys per level. For internal levels this counts child
    /// links, which is what fan-out analysis wants.
    pub fn key_distribution(&mut self) -> Result<BTreeMap<u16, u64>> {
        let mut keys: BTreeMap<u16, u64> = BTreeMap::new();
        self.traverser.pre_order(&mut |node, _depth| {
            *keys.entry(node.level()).or_default() += node.key_count() as u64;
            Ok(true)
        })?;
        Ok(keys)
    }

    /// Mean leaf occupancy as a percentage of each leaf's entry
    /// capacity.
    pub fn fill_factor_pct(&mut self) -> Result<f64> {
        let mut total = 0.0;
        let mut leaves = 0usize;
        self.traverser.leaves_only(&mut |node, _depth| {
            let capacity = Self::entry_capacity(node);
            if capacity > 0 {
                total += node.key_count() as f64 / capacity as f64;
            }
            leaves += 1;
            Ok(true)
        })?;
        if leaves == 0 {
            return Ok(0.0);
        }
        Ok(total / leaves as f64 * 100.0)
    }

    /// Share of data-area bytes holding table, key, or value content
    /// rather than free space.
    pub fn storage_efficiency_pct(&mut self) -> Result<f64> {
        let mut data_bytes = 0u64;
        let mut free_bytes = 0u64;
        self.traverser.pre_order(&mut |node, _depth| {
            data_bytes += node.data().len() as u64;
            free_bytes += node.free_space().length() as u64;
            Ok(true)
        })?;
        if data_bytes == 0 {
            return Ok(0.0);
        }
        Ok((data_bytes - free_bytes.min(data_bytes)) as f64 / data_bytes as f64 * 100.0)
    }

    /// One pass over the tree collecting the aggregate summary.
    pub fn analyze_structure(&mut self) -> Result<TreeStructure> {
        let height = self.height()?;
        let mut node_count = 0usize;
        let mut leaf_count = 0usize;
        let mut key_count = 0u64;
        let mut fill_total = 0.0;
        let mut data_bytes = 0u64;
        let mut free_bytes = 0u64;

        self.traverser.pre_order(&mut |node, _depth| {
            node_count += 1;
            data_bytes += node.data().len() as u64;
            free_bytes += node.free_space().length() as u64;
            if node.is_leaf() {
                leaf_count += 1;
                key_count += node.key_count() as u64;
                let capacity = Self::entry_capacity(node);
                if capacity > 0 {
                    fill_total += node.key_count() as f64 / capacity as f64;
                }
            }
            Ok(true)
        })?;

        let fill_factor_pct = if leaf_count == 0 {
            0.0
        } else {
            fill_total / leaf_count as f64 * 100.0
        };
        let storage_efficiency_pct = if data_bytes == 0 {
            0.0
        } else {
            (data_bytes - free_bytes.min(data_bytes)) as f64 / data_bytes as f64 * 100.0
        };

        Ok(TreeStructure {
            height,
            node_count,
            leaf_count,
            internal_count: node_count - leaf_count,
            key_count,
            fill_factor_pct,
            storage_efficiency_pct,
        })
    }

    /// Entries the node could hold: its size minus the fixed header and
    /// (for roots) the footer, divided by the table entry width.
    fn entry_capacity(node: &BtreeNode) -> usize {
        let mut usable = node.node_size().saturating_sub(BtreeNodePhys::HEADER_SIZE);
        if node.is_root() {
            usable = usable.saturating_sub(BtreeInfo::PACKED_SIZE);
        }
        usable / node.toc_entry_size()
    }
}
