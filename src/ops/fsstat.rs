//! `fsstat`: pool/superblock identity, uberblock selection, and the list
//! of datasets/subvolumes (and their snapshots) found in the pool.
//!
//! Grounded in `ZFS_POOL.cpp::fsstat()` and `BTRFS_POOL.cpp::fsstat()`,
//! which both dump the label/superblock fields first and then walk the
//! dataset/subvolume directory before returning.

use std::io::Write;

use crate::error::Result;
use crate::ops::dataset;
use crate::pool::Pool;

use super::Sink;

pub fn run(pool: &Pool, dataset: Option<&str>, txg: Option<u64>, out: &mut dyn Sink) -> Result<()> {
    match pool {
        Pool::Zfs(zfs_pool) => fsstat_zfs(zfs_pool, dataset, txg, out),
        Pool::Btrfs(fs) => fsstat_btrfs(fs, dataset, out),
    }
}

fn fsstat_zfs(
    pool: &crate::zfs::ZfsPool,
    requested: Option<&str>,
    txg: Option<u64>,
    out: &mut dyn Sink,
) -> Result<()> {
    writeln!(out, "POOL TYPE: ZFS")?;
    writeln!(out, "Pool name: {}", pool.name())?;
    writeln!(out, "Pool GUID: {:#018x}", pool.guid())?;
    writeln!(out, "Top-level vdevs: {}", pool.vdevs().len())?;

    for vdev in pool.vdevs() {
        writeln!(
            out,
            "  tvdev {}: {:?} guid={:#x} children={}/{} usable={}",
            vdev.id,
            vdev.kind,
            vdev.guid,
            vdev.available_children(),
            vdev.children.len(),
            vdev.is_usable()
        )?;
        for child in &vdev.children {
            writeln!(
                out,
                "    child guid={:#x} path={} present={}",
                child.guid,
                child.path,
                child.device.is_some()
            )?;
        }
    }

    let ub = pool.uberblock();
    writeln!(
        out,
        "Active uberblock: txg={} version={} timestamp={}{}",
        ub.txg,
        ub.version,
        ub.timestamp,
        txg.map(|t| format!(" (requested txg={t})")).unwrap_or_default()
    )?;

    writeln!(out, "Datasets:")?;
    let resolved = dataset::resolve(pool, requested)?;
    writeln!(
        out,
        "  {} (object id {}, root dir {})",
        requested.unwrap_or(pool.name()),
        resolved.object_id,
        resolved.root_dir_obj
    )?;

    Ok(())
}

fn fsstat_btrfs(fs: &crate::core::BtrfsFilesystem, requested: Option<&str>, out: &mut dyn Sink) -> Result<()> {
    writeln!(out, "POOL TYPE: BTRFS")?;
    writeln!(out, "Filesystem UUID: {}", fs.uuid())?;
    writeln!(out, "Label: {}", fs.label())?;
    writeln!(
        out,
        "Devices: {}/{} present",
        fs.available_devices(),
        fs.expected_devices()
    )?;
    writeln!(out, "Total bytes: {}", fs.total_bytes())?;
    writeln!(out, "Bytes used: {}", fs.bytes_used())?;
    writeln!(out, "Node size: {}", fs.node_size())?;
    writeln!(out, "Generation: {}", fs.superblock().generation())?;

    writeln!(out, "Subvolumes:")?;
    let subvolumes = fs.list_subvolumes()?;
    for subvol in &subvolumes {
        writeln!(
            out,
            "  id={} parent={} name={} path={} readonly={}",
            subvol.id,
            subvol.parent_id,
            subvol.name,
            subvol.path,
            subvol.flags & crate::core::subvolume::subvol_flags::RDONLY != 0
        )?;
    }

    if let Some(name) = requested {
        let found = subvolumes.iter().any(|s| s.name == name);
        if !found {
            return Err(crate::error::PoolError::NotFound(format!(
                "no subvolume named {}",
                name
            )));
        }
    }

    Ok(())
}
