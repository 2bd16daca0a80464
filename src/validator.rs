//! Structural sanity checks for a single B-tree node.
//!
//! Unlike the decoders, the validator never raises: it accumulates its
//! findings so a damaged node can be described in one pass. Errors mark
//! the node invalid; warnings flag structure that is legal but
//! suspicious on a healthy container.

use apfs_types::btree::{BTOFF_INVALID, BtreeInfo};

use crate::error::Result;
use crate::node::BtreeNode;
use crate::reader;

/// Key counts above this are structurally impossible and an error.
pub const KEY_COUNT_HARD_LIMIT: usize = 10_000;
/// Key counts above this are legal but suspicious.
pub const KEY_COUNT_SOFT_LIMIT: usize = 1_000;
/// Per-entry problems reported before the rest are elided.
pub const MAX_ENTRY_ERRORS: usize = 5;

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn error(&mut self, message: String) {
        self.valid = false;
        self.errors.push(message);
    }

    fn warning(&mut self, message: String) {
        self.warnings.push(message);
    }
}

/// Run the full battery of checks against a decoded node.
pub fn validate_node(node: &BtreeNode) -> ValidationReport {
    let mut report = ValidationReport::new();
    let data_len = node.data().len();
    let nkeys = node.key_count();
    let entry_size = node.toc_entry_size();

    // Leaf flag and level must agree.
    if node.is_leaf() != (node.level() == 0) {
        report.error(format!("leaf flag disagrees with level {}", node.level()));
    }

    // Key count bounds.
    if node.is_root() && nkeys == 0 {
        if node.is_leaf() {
            report.warning("empty root leaf: a single-node tree with no keys".into());
        } else {
            report.error("root node has no keys".into());
        }
    }
    if nkeys > KEY_COUNT_HARD_LIMIT {
        report.error(format!("key count {nkeys} is impossibly large"));
    } else if nkeys > KEY_COUNT_SOFT_LIMIT {
        report.warning(format!("key count {nkeys} is unusually large"));
    }

    // Table of contents must sit inside the data area and cover the
    // claimed keys.
    let table = node.table_space();
    let table_fits = table.off != BTOFF_INVALID && table.end() <= data_len;
    if !table_fits {
        report.error(format!(
            "table of contents {}+{} exceeds data area of {} bytes",
            table.off, table.len, data_len
        ));
    }
    let needed = nkeys * entry_size;
    if (table.len as usize) < needed {
        report.error(format!(
            "table of contents holds {} bytes but {nkeys} keys need {needed}",
            table.len
        ));
    } else if table.len as usize != needed {
        report.warning(format!(
            "table of contents holds {} bytes where {nkeys} keys need {needed}",
            table.len
        ));
    }

    if table_fits && (table.len as usize) >= needed {
        check_entries(node, &mut report);
    }

    // Free-list heads may be absent, but a present one must stay inside
    // the data area.
    for (name, list) in [
        ("key free list", node.key_free_list()),
        ("value free list", node.value_free_list()),
    ] {
        if list.is_valid() && list.end() > data_len {
            report.error(format!(
                "{name} {}+{} exceeds data area of {data_len} bytes",
                list.off, list.len
            ));
        }
    }

    // A root needs room for the info footer at its tail.
    if node.is_root() && data_len < BtreeInfo::PACKED_SIZE {
        report.warning(format!(
            "root data area of {data_len} bytes cannot hold the {}-byte info footer",
            BtreeInfo::PACKED_SIZE
        ));
    }

    report
}

fn check_entries(node: &BtreeNode, report: &mut ValidationReport) {
    let mut entry_errors = 0usize;
    for index in 0..node.key_count() {
        if entry_errors >= MAX_ENTRY_ERRORS {
            report.warning(format!(
                "further entry problems elided after the first {MAX_ENTRY_ERRORS}"
            ));
            break;
        }
        if let Err(problem) = check_entry(node, index) {
            report.error(problem);
            entry_errors += 1;
        }
    }
}

/// A single entry's byte ranges, checked without the engine's early
/// bail-out so each problem gets its own message.
fn check_entry(node: &BtreeNode, index: usize) -> std::result::Result<(), String> {
    let data = node.data();
    let data_len = data.len();
    let base = node.table_space().off as usize + index * node.toc_entry_size();
    let endian = node.endian();

    let read_slot = |offset: usize| -> Result<usize> {
        Ok(reader::read_u16(data, base + offset, endian)? as usize)
    };

    if node.has_fixed_kv_size() {
        let key_off = read_slot(0).map_err(|_| format!("entry {index}: table slot unreadable"))?;
        let val_off = read_slot(2).map_err(|_| format!("entry {index}: table slot unreadable"))?;
        if key_off + BtreeNode::FIXED_KEY_SIZE > data_len {
            return Err(format!(
                "entry {index}: key at {key_off} exceeds data area of {data_len} bytes"
            ));
        }
        if val_off != BTOFF_INVALID as usize {
            if val_off + BtreeNode::FIXED_VALUE_SIZE > data_len {
                return Err(format!(
                    "entry {index}: value at {val_off} exceeds data area of {data_len} bytes"
                ));
            }
        } else if !node.is_leaf() {
            return Err(format!("entry {index}: internal entry has no child pointer"));
        }
    } else {
        let key_off = read_slot(0).map_err(|_| format!("entry {index}: table slot unreadable"))?;
        let key_len = read_slot(2).map_err(|_| format!("entry {index}: table slot unreadable"))?;
        let val_off = read_slot(4).map_err(|_| format!("entry {index}: table slot unreadable"))?;
        let val_len = read_slot(6).map_err(|_| format!("entry {index}: table slot unreadable"))?;
        if key_off + key_len > data_len {
            return Err(format!(
                "entry {index}: key {key_off}+{key_len} exceeds data area of {data_len} bytes"
            ));
        }
        if val_off == BTOFF_INVALID as usize {
            if !node.is_leaf() {
                return Err(format!("entry {index}: internal entry has no child pointer"));
            }
        } else {
            if val_off + val_len > data_len {
                return Err(format!(
                    "entry {index}: value {val_off}+{val_len} exceeds data area of {data_len} bytes"
                ));
            }
            if !node.is_leaf() && val_len < 8 {
                return Err(format!(
                    "entry {index}: {val_len}-byte value cannot hold a child identifier"
                ));
            }
        }
    }
    Ok(())
}
