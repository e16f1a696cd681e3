//! `fls`: recursive directory listing (`type  inode  path` per line).
//!
//! Grounded in `ZFS_POOL.cpp::fls()`'s ZAP-directory recursion and
//! `BTRFS_POOL.cpp::fls()`'s `DIR_INDEX` recursion — both walk a single
//! directory object/objectid, emit one line per entry, and recurse into
//! every child that is itself a directory.

use std::io::Write;

use crate::core::{item_type, BtrfsFilesystem, BtrfsKey};
use crate::error::Result;
use crate::ops::{dataset, support};
use crate::pool::Pool;
use crate::zfs::dmu::ObjectSet;
use crate::zfs::{Zap, ZfsPool};

use super::Sink;

/// Directory-entry type tag ZFS packs into the top byte of a ZAP
/// directory value (`ZFS_POOL.cpp::listFiles()`'s `0x80`/`0x40` check).
mod dirent_type {
    pub const DIR: u8 = 0x40;
    pub const REG: u8 = 0x80;
}

/// Mask clearing the top (type-tag) byte of a ZAP directory value, leaving
/// the object id it names.
const OBJ_ID_MASK: u64 = 0x00FF_FFFF_FFFF_FFFF;

pub fn run(pool: &Pool, dataset: Option<&str>, _txg: Option<u64>, out: &mut dyn Sink) -> Result<()> {
    match pool {
        Pool::Zfs(zfs_pool) => fls_zfs(zfs_pool, dataset, out),
        Pool::Btrfs(fs) => fls_btrfs(fs, dataset, out),
    }
}

fn fls_zfs(pool: &ZfsPool, requested: Option<&str>, out: &mut dyn Sink) -> Result<()> {
    let resolved = dataset::resolve(pool, requested)?;
    walk_zfs_dir(pool, &resolved.objects, resolved.root_dir_obj, "/", out)
}

fn walk_zfs_dir(pool: &ZfsPool, objects: &ObjectSet, dir_obj: u64, path: &str, out: &mut dyn Sink) -> Result<()> {
    let dnode = objects.dnode(dir_obj)?;
    let data = dnode.get_data(&mut |bp| pool.read_block(bp))?;
    let zap = Zap::parse(&data)?;

    let mut entries: Vec<(&String, &u64)> = zap.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    for (name, value) in entries {
        let type_tag = (value >> 56) as u8;
        let obj_id = value & OBJ_ID_MASK;
        let glyph = match type_tag {
            dirent_type::DIR => 'd',
            dirent_type::REG => 'r',
            _ => '?',
        };
        writeln!(out, "{}  {}  {}{}", glyph, obj_id, path, name)?;

        if type_tag == dirent_type::DIR {
            let child_path = format!("{}{}/", path, name);
            walk_zfs_dir(pool, objects, obj_id, &child_path, out)?;
        }
    }

    Ok(())
}

fn fls_btrfs(fs: &BtrfsFilesystem, requested: Option<&str>, out: &mut dyn Sink) -> Result<()> {
    let subvol = support::resolve_subvolume(fs, requested)?;
    let tree = fs.subvolume_tree(subvol.id)?;
    walk_btrfs_dir(&tree, subvol.root_dirid, "/", out)
}

fn walk_btrfs_dir(
    tree: &crate::core::BtrfsTree<'_>,
    dir_ino: u64,
    path: &str,
    out: &mut dyn Sink,
) -> Result<()> {
    let entries = tree.search_range(
        &BtrfsKey::new(dir_ino, item_type::DIR_INDEX, 0),
        &BtrfsKey::new(dir_ino, item_type::DIR_INDEX, u64::MAX),
    )?;

    let mut named: Vec<(String, crate::core::inode::DirEntry)> = entries
        .into_iter()
        .filter_map(|(_, data)| crate::core::inode::DirEntry::from_bytes(&data).ok())
        .map(|entry| (entry.name.clone(), entry))
        .collect();
    named.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, entry) in named {
        let glyph = match entry.entry_type {
            crate::core::InodeType::Directory => 'd',
            crate::core::InodeType::File => 'r',
            crate::core::InodeType::Symlink => 'l',
            _ => '?',
        };
        writeln!(out, "{}  {}  {}{}", glyph, entry.ino, path, name)?;

        if entry.entry_type.is_dir() {
            let child_path = format!("{}{}/", path, name);
            walk_btrfs_dir(tree, entry.ino, &child_path, out)?;
        }
    }

    Ok(())
}
