//! `icat`: streams an object's reconstructed content.
//!
//! Grounded in `ZFS_POOL.cpp::icat()` (walks a dnode's block pointer tree
//! and truncates to the znode bonus's `size`) and `BTRFS_POOL.cpp::icat()`
//! (walks `EXTENT_DATA` items in file-offset order, decompressing each).

use std::io::Write;

use crate::core::compress::{decompress, CompressionType};
use crate::core::{item_type, BtrfsFilesystem, BtrfsKey};
use crate::error::{PoolError, Result};
use crate::ops::{dataset, support};
use crate::pool::Pool;
use crate::zfs::dmu::Bonus;
use crate::zfs::ZfsPool;

use super::Sink;

pub fn run(
    pool: &Pool,
    inode: u64,
    dataset: Option<&str>,
    _txg: Option<u64>,
    out: &mut dyn Sink,
) -> Result<()> {
    match pool {
        Pool::Zfs(zfs_pool) => icat_zfs(zfs_pool, inode, dataset, out),
        Pool::Btrfs(fs) => icat_btrfs(fs, inode, dataset, out),
    }
}

fn icat_zfs(pool: &ZfsPool, object_id: u64, requested: Option<&str>, out: &mut dyn Sink) -> Result<()> {
    let resolved = dataset::resolve(pool, requested)?;
    let dnode = resolved.objects.dnode(object_id)?;
    let mut data = dnode.get_data(&mut |bp| pool.read_block(bp))?;

    if let Bonus::Znode { size, .. } = &dnode.bonus {
        data.truncate(*size as usize);
    }

    out.write_all(&data)?;
    Ok(())
}

fn icat_btrfs(fs: &BtrfsFilesystem, ino: u64, requested: Option<&str>, out: &mut dyn Sink) -> Result<()> {
    let subvol = support::resolve_subvolume(fs, requested)?;
    let tree = fs.subvolume_tree(subvol.id)?;

    let mut extents = tree.search_range(
        &BtrfsKey::new(ino, item_type::EXTENT_DATA, 0),
        &BtrfsKey::new(ino, item_type::EXTENT_DATA, u64::MAX),
    )?;
    extents.sort_by_key(|(item, _)| item.key.offset);

    for (_, raw) in extents {
        let extent = crate::core::inode::ExtentData::from_bytes(&raw)?;

        if extent.is_inline() {
            let inline = extent.inline_data.as_deref().unwrap_or(&[]);
            let compression = CompressionType::from_u8(extent.compression)?;
            let decoded = decompress(compression, inline, extent.ram_bytes as usize)?;
            out.write_all(&decoded)?;
            continue;
        }

        if extent.is_sparse() {
            let num_bytes = extent.num_bytes.unwrap_or(0) as usize;
            out.write_all(&vec![0u8; num_bytes])?;
            continue;
        }

        if extent.is_prealloc() {
            let num_bytes = extent.num_bytes.unwrap_or(0) as usize;
            out.write_all(&vec![0u8; num_bytes])?;
            continue;
        }

        let disk_bytenr = extent
            .disk_bytenr
            .ok_or_else(|| PoolError::NotFound(format!("extent for inode {} missing disk_bytenr", ino)))?;
        let disk_num_bytes = extent.disk_num_bytes.unwrap_or(0) as usize;
        let extent_offset = extent.offset.unwrap_or(0) as usize;
        let num_bytes = extent.num_bytes.unwrap_or(0) as usize;

        let mut buf = vec![0u8; disk_num_bytes];
        fs.read_logical(disk_bytenr, &mut buf)?;

        let compression = CompressionType::from_u8(extent.compression)?;
        let decoded = decompress(compression, &buf, extent.ram_bytes as usize)?;

        let end = (extent_offset + num_bytes).min(decoded.len());
        let start = extent_offset.min(end);
        out.write_all(&decoded[start..end])?;
    }

    Ok(())
}
