//! Visitor-pattern walks over a whole tree.
//!
//! Visitors receive `(node, depth)` and return `Ok(true)` to continue
//! or `Ok(false)` to stop the walk early with success. Children of a
//! node are always visited left to right by table index, so every walk
//! order is deterministic.

use std::collections::VecDeque;

use apfs_types::object::Oid;

use crate::btree::navigator::BtreeNavigator;
use crate::error::{Error, Result};
use crate::node::BtreeNode;
use crate::source::BlockSource;

enum DepthOrder {
    Pre,
    In,
    Post,
}

/// Runs ordered walks over the tree below a navigator's root.
pub struct BtreeTraverser<S: BlockSource> {
    navigator: BtreeNavigator<S>,
}

impl<S: BlockSource> BtreeTraverser<S> {
    pub fn new(navigator: BtreeNavigator<S>) -> Self {
        Self { navigator }
    }

    pub fn navigator_mut(&mut self) -> &mut BtreeNavigator<S> {
        &mut self.navigator
    }

    /// Visit each node before its children.
    pub fn pre_order<F>(&mut self, visit: &mut F) -> Result<()>
    where
        F: FnMut(&BtreeNode, usize) -> Result<bool> + ?Sized,
    {
        self.depth_first(DepthOrder::Pre, visit)
    }

    /// Visit each node between its first child and the rest.
    pub fn in_order<F>(&mut self, visit: &mut F) -> Result<()>
    where
        F: FnMut(&BtreeNode, usize) -> Result<bool> + ?Sized,
    {
        self.depth_first(DepthOrder::In, visit)
    }

    /// Visit each node after its children.
    pub fn post_order<F>(&mut self, visit: &mut F) -> Result<()>
    where
        F: FnMut(&BtreeNode, usize) -> Result<bool> + ?Sized,
    {
        self.depth_first(DepthOrder::Post, visit)
    }

    /// Visit leaves only, left to right.
    pub fn leaves_only<F>(&mut self, visit: &mut F) -> Result<()>
    where
        F: FnMut(&BtreeNode, usize) -> Result<bool> + ?Sized,
    {
        self.depth_first(DepthOrder::Pre, &mut |node: &BtreeNode, depth| {
            if node.is_leaf() { visit(node, depth) } else { Ok(true) }
        })
    }

    /// Visit nodes a level at a time, top down.
    pub fn level_order<F>(&mut self, visit: &mut F) -> Result<()>
    where
        F: FnMut(&BtreeNode, usize) -> Result<bool> + ?Sized,
    {
        let mut queue: VecDeque<(Oid, usize)> = VecDeque::new();
        let mut seen: Vec<Oid> = Vec::new();
        queue.push_back((self.navigator.root_oid(), 0));

        while let Some((oid, depth)) = queue.pop_front() {
            if seen.contains(&oid) {
                return Err(Error::CycleDetected(oid));
            }
            seen.push(oid);

            let node = self.navigator.node_by_oid(oid)?;
            if !visit(&node, depth)? {
                return Ok(());
            }
            if !node.is_leaf() {
                for index in 0..node.key_count() {
                    queue.push_back((node.child_oid(index)?, depth + 1));
                }
            }
        }
        Ok(())
    }

    fn depth_first<F>(&mut self, order: DepthOrder, visit: &mut F) -> Result<()>
    where
        F: FnMut(&BtreeNode, usize) -> Result<bool> + ?Sized,
    {
        let root_oid = self.navigator.root_oid();
        let mut path = Vec::new();
        self.walk(root_oid, 0, &order, &mut path, visit)?;
        Ok(())
    }

    /// Returns false once a visitor has asked to stop.
    fn walk<F>(
        &mut self,
        oid: Oid,
        depth: usize,
        order: &DepthOrder,
        path: &mut Vec<Oid>,
        visit: &mut F,
    ) -> Result<bool>
    where
        F: FnMut(&BtreeNode, usize) -> Result<bool> + ?Sized,
    {
        if path.contains(&oid) {
            return Err(Error::CycleDetected(oid));
        }
        path.push(oid);

        let node = self.navigator.node_by_oid(oid)?;
        let mut keep_going = true;

        if node.is_leaf() {
            keep_going = visit(&node, depth)?;
        } else {
            let children = node.key_count();
            if matches!(order, DepthOrder::Pre) {
                keep_going = visit(&node, depth)?;
            }
            for index in 0..children {
                if !keep_going {
                    break;
                }
                // In-order: the node itself goes between the first
                // child and the remaining ones.
                if matches!(order, DepthOrder::In) && index == 1 {
                    keep_going = visit(&node, depth)?;
                    if !keep_going {
                        break;
                    }
                }
                let child = node.child_oid(index)?;
                keep_going = self.walk(child, depth + 1, order, path, visit)?;
            }
            if keep_going && matches!(order, DepthOrder::In) && children <= 1 {
                keep_going = visit(&node, depth)?;
            }
            if keep_going && matches!(order, DepthOrder::Post) {
                keep_going = visit(&node, depth)?;
            }
        }

        path.pop();
        Ok(keep_going)
    }
}
