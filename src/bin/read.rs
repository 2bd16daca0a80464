//! Inspect an APFS container image: superblock, checkpoint scan, and
//! the object-map B-tree root.

use std::io;
use std::os::unix::prelude::FileExt;
use std::{env, fs::File};

use apfs_types::Endian;
use apfs_types::container::NxSuperblock;
use apfs_types::object::OBJECT_TYPE_NX_SUPERBLOCK;
use apfsrust::node::BtreeNode;
use apfsrust::source::{BlockSource, FileBlockSource};
use apfsrust::validator::validate_node;
use apfsrust::{checksum, object, records};

fn main() -> Result<(), io::Error> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("usage: read /path/to/container.img");
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Missing image argument",
        ));
    }

    let image_path = args.get(1).expect("Path to image is first argument");
    println!("Operating on {image_path}");

    let image = File::options()
        .read(true)
        .open(image_path)
        .expect("Open container image for reading");

    // Block zero holds a copy of the container superblock; its own
    // geometry field tells us the real block size.
    let mut block = vec![0u8; 4096];
    image
        .read_exact_at(&mut block, 0)
        .expect("Read 4kB at start of image");

    if !checksum::verify_block(&block) {
        eprintln!("Block zero fails its checksum; continuing to parse anyway.");
    }

    let superblock =
        records::nx_superblock(&block, Endian::Little).expect("Parse container superblock");
    let block_size = superblock.block_size as usize;

    println!("Successfully parsed container superblock.");
    println!("Block size:  {block_size}");
    println!("Block count: {}", superblock.block_count);
    println!("Next xid:    {}", superblock.next_xid);
    println!("Spaceman:    {:#x}", superblock.spaceman_oid);
    println!("Object map:  {:#x}", superblock.omap_oid);
    println!("Reaper:      {:#x}", superblock.reaper_oid);
    let volumes: Vec<_> = superblock.volume_oids().collect();
    println!("Volumes:     {volumes:#x?}");
    println!();

    let source = FileBlockSource::open(image_path, block_size)
        .expect("Reopen image as a block source");

    let latest = scan_checkpoints(&source, &superblock);
    println!(
        "Latest checkpoint superblock: xid {} (block zero copy holds xid {})",
        latest.header.xid, superblock.header.xid
    );
    println!();

    // The container object map is a physical object; its identifier is
    // the block address.
    let omap_block = source
        .read_node(latest.omap_oid)
        .expect("Read object-map block");
    let omap = records::omap(&omap_block, Endian::Little).expect("Parse object map");
    println!("Object map tree at {:#x}", omap.tree_oid);

    let root_block = source
        .read_node(omap.tree_oid)
        .expect("Read object-map tree root");
    let root = BtreeNode::decode(&root_block, Endian::Little).expect("Decode tree root");
    println!(
        "Root node: level {}, {} keys, {} bytes",
        root.level(),
        root.key_count(),
        root.node_size()
    );

    let report = validate_node(&root);
    println!("Structurally valid: {}", report.valid);
    report
        .errors
        .iter()
        .for_each(|problem| println!("error: {problem}"));
    report
        .warnings
        .iter()
        .for_each(|warning| println!("warning: {warning}"));

    Ok(())
}

/// Scan the checkpoint descriptor area for the superblock with the
/// highest transaction identifier, falling back to the block-zero copy
/// when the area holds nothing newer.
fn scan_checkpoints(source: &FileBlockSource, superblock: &NxSuperblock) -> NxSuperblock {
    let mut best = superblock.clone();

    for index in 0..u64::from(superblock.xp_desc_blocks) {
        let address = superblock.xp_desc_base + index;
        let Ok(block) = source.read_node(address) else {
            continue;
        };
        // Stale or half-written checkpoints are expected; skip quietly.
        if !checksum::verify_block(&block) {
            continue;
        }
        let Ok(header) = object::decode_header(&block, Endian::Little) else {
            continue;
        };
        if header.type_tag() != OBJECT_TYPE_NX_SUPERBLOCK {
            continue;
        }
        let Ok(candidate) = records::nx_superblock(&block, Endian::Little) else {
            continue;
        };
        if candidate.header.xid > best.header.xid {
            best = candidate;
        }
    }

    best
}
