//! B-tree traversal stack: fetching and caching nodes, key search,
//! ordered walks, and structural statistics.
//!
//! Everything here composes the node engine with a [`BlockSource`].
//! Parent/child links are by object identifier only; nodes never hold
//! pointers to each other, and every descent tracks the identifiers on
//! its path so reference cycles on damaged images are detected rather
//! than looped on.
//!
//! [`BlockSource`]: crate::source::BlockSource

mod analyzer;
mod navigator;
mod searcher;
mod traverser;

pub use analyzer::{BtreeAnalyzer, TreeStructure};
pub use navigator::{BtreeNavigator, DEFAULT_CACHE_CAPACITY};
pub use searcher::{BtreeSearcher, BytewiseComparer, KeyComparer};
pub use traverser::BtreeTraverser;
