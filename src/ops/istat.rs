//! `istat`: prints the on-disk inode/dnode record for a single object.
//!
//! Grounded in `ZFS_POOL.cpp::istat()` (dumps a dnode's blkptr array and
//! bonus buffer) and `BTRFS_POOL.cpp::istat()` (dumps an `INODE_ITEM` plus
//! every `EXTENT_DATA` record naming the inode's content).

use std::io::Write;

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
        Pool::Zfs(zfs_pool) => istat_zfs(zfs_pool, inode, dataset, out),
        Pool::Btrfs(fs) => istat_btrfs(fs, inode, dataset, out),
    }
}

fn istat_zfs(pool: &ZfsPool, object_id: u64, requested: Option<&str>, out: &mut dyn Sink) -> Result<()> {
    let resolved = dataset::resolve(pool, requested)?;
    let dnode = resolved.objects.dnode(object_id)?;

    writeln!(out, "Object: {}", object_id)?;
    writeln!(out, "Type: {}", dnode.object_type)?;
    writeln!(out, "Indirection levels: {}", dnode.nlevels)?;
    writeln!(out, "Block pointers: {}", dnode.nblkptr)?;
    writeln!(out, "Data block size (sectors): {}", dnode.datablkszsec)?;
    writeln!(out, "Max block id: {}", dnode.maxblkid)?;

    for (i, bp) in dnode.blkptr.iter().enumerate() {
        writeln!(
            out,
            "  blkptr[{}]: lsize={} psize={} compress={} birth={} hole={}",
            i,
            bp.lsize,
            bp.psize,
            bp.compress,
            bp.birth,
            bp.is_hole()
        )?;
    }

    match &dnode.bonus {
        Bonus::Znode {
            atime,
            mtime,
            ctime,
            crtime,
            size,
            parent,
        } => {
            writeln!(out, "Bonus: znode")?;
            writeln!(out, "  size: {}", size)?;
            writeln!(out, "  parent: {}", parent)?;
            writeln!(out, "  atime: {} mtime: {} ctime: {} crtime: {}", atime, mtime, ctime, crtime)?;
        }
        Bonus::DslDataset {
            dir_obj,
            used_bytes,
            compressed_bytes,
            uncompressed_bytes,
            guid,
            ..
        } => {
            writeln!(out, "Bonus: dsl_dataset")?;
            writeln!(out, "  dir_obj: {}", dir_obj)?;
            writeln!(out, "  guid: {:#x}", guid)?;
            writeln!(
                out,
                "  used_bytes: {} compressed_bytes: {} uncompressed_bytes: {}",
                used_bytes, compressed_bytes, uncompressed_bytes
            )?;
        }
        Bonus::DslDirectory {
            head_dataset_obj,
            parent_obj,
            child_dir_zapobj,
            ..
        } => {
            writeln!(out, "Bonus: dsl_directory")?;
            writeln!(out, "  head_dataset_obj: {}", head_dataset_obj)?;
            writeln!(out, "  parent_obj: {}", parent_obj)?;
            writeln!(out, "  child_dir_zapobj: {}", child_dir_zapobj)?;
        }
        Bonus::Raw(data) => {
            writeln!(out, "Bonus: raw ({} bytes)", data.len())?;
        }
    }

    Ok(())
}

fn istat_btrfs(fs: &BtrfsFilesystem, ino: u64, requested: Option<&str>, out: &mut dyn Sink) -> Result<()> {
    let subvol = support::resolve_subvolume(fs, requested)?;
    let tree = fs.subvolume_tree(subvol.id)?;

    let (_, data) = tree
        .search(&BtrfsKey::new(ino, item_type::INODE_ITEM, 0))?
        .ok_or_else(|| PoolError::NotFound(format!("inode {} not found", ino)))?;
    let inode = crate::core::inode::Inode::from_bytes(ino, &data)?;

    writeln!(out, "Inode: {}", inode.ino)?;
    writeln!(out, "Type: {:?}", inode.inode_type())?;
    writeln!(out, "Mode: {:#o}", inode.mode)?;
    writeln!(out, "Size: {}", inode.size)?;
    writeln!(out, "Links: {}", inode.nlink)?;
    writeln!(out, "UID/GID: {}/{}", inode.uid, inode.gid)?;
    writeln!(out, "Generation: {}", inode.generation)?;
    writeln!(
        out,
        "Access: {}.{} Change: {}.{} Modify: {}.{} Create: {}.{}",
        inode.atime.sec,
        inode.atime.nsec,
        inode.ctime.sec,
        inode.ctime.nsec,
        inode.mtime.sec,
        inode.mtime.nsec,
        inode.otime.sec,
        inode.otime.nsec
    )?;

    if inode.is_file() {
        writeln!(out, "Extents:")?;
        let extents = tree.search_range(
            &BtrfsKey::new(ino, item_type::EXTENT_DATA, 0),
            &BtrfsKey::new(ino, item_type::EXTENT_DATA, u64::MAX),
        )?;
        let mut extents: Vec<_> = extents.into_iter().collect();
        extents.sort_by_key(|(item, _)| item.key.offset);

        for (item, data) in extents {
            let extent = crate::core::inode::ExtentData::from_bytes(&data)?;
            if extent.is_inline() {
                writeln!(
                    out,
                    "  file_offset={} inline ram_bytes={} compression={}",
                    item.key.offset, extent.ram_bytes, extent.compression
                )?;
            } else {
                writeln!(
                    out,
                    "  file_offset={} disk_bytenr={:?} disk_num_bytes={:?} extent_offset={:?} num_bytes={:?} compression={}",
                    item.key.offset,
                    extent.disk_bytenr,
                    extent.disk_num_bytes,
                    extent.offset,
                    extent.num_bytes,
                    extent.compression
                )?;
            }
        }
    }

    Ok(())
}
