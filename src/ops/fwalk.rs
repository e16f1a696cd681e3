//! `fwalk`: ZFS-only recursive directory walk, with optional restoration
//! of file content to a caller-supplied sink per path.
//!
//! Grounded in `ZFS_POOL.cpp::fwalk()`, which combines the ZAP-directory
//! recursion of `fls()` with a per-regular-file call into `icat()`'s
//! block-pointer walk, handing the reconstructed bytes to a restore
//! callback instead of only printing a listing line.

use std::io::Write;

use crate::error::{PoolError, Result};
use crate::ops::dataset;
use crate::pool::Pool;
use crate::zfs::dmu::{Bonus, ObjectSet};
use crate::zfs::{Zap, ZfsPool};

use super::Sink;

mod dirent_type {
    pub const DIR: u8 = 0x40;
    pub const REG: u8 = 0x80;
}

/// Mask clearing the top (type-tag) byte of a ZAP directory value, leaving
/// the object id it names.
const OBJ_ID_MASK: u64 = 0x00FF_FFFF_FFFF_FFFF;

/// Receives a restored file's full path and reconstructed content.
///
/// Implemented by CLI binaries that write files back out to a real
/// filesystem; tests can implement it over an in-memory map instead.
pub trait RestoreSink {
    fn restore_file(&mut self, path: &str, data: &[u8]) -> Result<()>;
}

pub fn run(
    pool: &Pool,
    dataset: Option<&str>,
    _txg: Option<u64>,
    restore: Option<&mut dyn RestoreSink>,
    out: &mut dyn Sink,
) -> Result<()> {
    match pool {
        Pool::Zfs(zfs_pool) => fwalk_zfs(zfs_pool, dataset, restore, out),
        Pool::Btrfs(_) => Err(PoolError::UnsupportedLayout(
            "fwalk is only implemented for ZFS pools".to_string(),
        )),
    }
}

fn fwalk_zfs(
    pool: &ZfsPool,
    requested: Option<&str>,
    mut restore: Option<&mut dyn RestoreSink>,
    out: &mut dyn Sink,
) -> Result<()> {
    let resolved = dataset::resolve(pool, requested)?;
    walk_dir(
        pool,
        &resolved.objects,
        resolved.root_dir_obj,
        "/",
        &mut restore,
        out,
    )
}

fn walk_dir(
    pool: &ZfsPool,
    objects: &ObjectSet,
    dir_obj: u64,
    path: &str,
    restore: &mut Option<&mut dyn RestoreSink>,
    out: &mut dyn Sink,
) -> Result<()> {
    let dnode = objects.dnode(dir_obj)?;
    let data = dnode.get_data(&mut |bp| pool.read_block(bp))?;
    let zap = Zap::parse(&data)?;

    let mut entries: Vec<(&String, &u64)> = zap.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    for (name, value) in entries {
        let type_tag = (value >> 56) as u8;
        let obj_id = value & OBJ_ID_MASK;
        let entry_path = format!("{}{}", path, name);

        let glyph = match type_tag {
            dirent_type::DIR => 'd',
            dirent_type::REG => 'r',
            _ => '?',
        };
        writeln!(out, "{}  {}  {}", glyph, obj_id, entry_path)?;

        match type_tag {
            dirent_type::DIR => {
                let child_path = format!("{}/", entry_path);
                walk_dir(pool, objects, obj_id, &child_path, restore, out)?;
            }
            dirent_type::REG => {
                if let Some(sink) = restore.as_deref_mut() {
                    let file_dnode = objects.dnode(obj_id)?;
                    let mut content = file_dnode.get_data(&mut |bp| pool.read_block(bp))?;
                    if let Bonus::Znode { size, .. } = &file_dnode.bonus {
                        content.truncate(*size as usize);
                    }
                    sink.restore_file(&entry_path, &content)?;
                }
            }
            _ => {}
        }
    }

    Ok(())
}
