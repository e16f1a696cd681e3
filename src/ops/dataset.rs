//! Dataset naming and resolution for ZFS: `name[@snapshot]` down to the
//! dataset's own object set and root directory object, following the
//! Meta Object Set (MOS) from the pool's selected uberblock.
//!
//! Grounded in `ZFS_POOL.cpp`'s dataset-name split logic and
//! `Dnode.cpp::generateBonus()`'s DSL directory/dataset bonus fields
//! (`dd_head_dataset`, `dd_child_dir_zapobj`, `ds_snapnames_zapobj`).

use crate::error::{PoolError, Result};
use crate::zfs::dmu::{Bonus, Dnode, ObjectSet};
use crate::zfs::{self, Blkptr, Zap, ZfsPool};

/// A dataset name split into its filesystem/volume part and, if present,
/// its snapshot part: `pool/fs@snap` → `{ name: "pool/fs", snapshot: Some("snap") }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetName {
    pub name: String,
    pub snapshot: Option<String>,
}

impl DatasetName {
    pub fn parse(s: &str) -> Self {
        match s.split_once('@') {
            Some((name, snap)) => DatasetName {
                name: name.to_string(),
                snapshot: Some(snap.to_string()),
            },
            None => DatasetName {
                name: s.to_string(),
                snapshot: None,
            },
        }
    }
}

/// A dataset or snapshot, fully resolved down to its own object set and
/// root directory object, ready for `fls`/`istat`/`icat`/`fwalk` to walk.
pub struct ResolvedDataset {
    pub object_id: u64,
    pub objects: ObjectSet,
    pub root_dir_obj: u64,
}

/// Reads and parses the Meta Object Set reachable from `pool`'s selected
/// uberblock: the root block pointer names a single block holding an
/// `objset_phys_t`, whose first 512 bytes are the meta-dnode naming every
/// other object (dataset, ZAP, dnode) that lives in the pool.
pub fn read_meta_object_set(pool: &ZfsPool) -> zfs::Result<ObjectSet> {
    let objset_data = pool.read_block(&pool.uberblock().rootbp)?;
    read_object_set_from_objset_block(pool, &objset_data)
}

/// Parses an `objset_phys_t` block (the result of dereferencing any
/// dataset's root block pointer, including the MOS's) into the object
/// set it describes.
fn read_object_set_from_objset_block(pool: &ZfsPool, objset_data: &[u8]) -> zfs::Result<ObjectSet> {
    if objset_data.len() < zfs::dmu::DNODE_SIZE {
        return Err(zfs::ZfsError::CorruptDnode(
            "objset block too small for meta-dnode".to_string(),
        ));
    }
    let meta_dnode = Dnode::from_bytes(&objset_data[..zfs::dmu::DNODE_SIZE])?;
    let dnode_array = meta_dnode.get_data(&mut |bp| pool.read_block(bp))?;
    Ok(ObjectSet::from_data(&dnode_array))
}

/// Resolves `name[@snapshot]` (or, when `dataset` is `None`, the pool's
/// root dataset) against the MOS's object-directory ZAP (object 1) and
/// the DSL directory tree, descending `dd_child_dir_zapobj` for each path
/// component and, for a snapshot, indexing the resulting dataset's
/// `ds_snapnames_zapobj`.
pub fn resolve(pool: &ZfsPool, dataset: Option<&str>) -> Result<ResolvedDataset> {
    let mos = read_meta_object_set(pool)?;

    let object_directory = mos.dnode(1)?;
    let object_directory_data = object_directory.get_data(&mut |bp| pool.read_block(bp))?;
    let object_directory_zap = Zap::parse(&object_directory_data)?;

    let root_dir_obj = object_directory_zap
        .get("root_dataset")
        .ok_or_else(|| PoolError::NotFound("root_dataset entry missing from MOS".to_string()))?;

    let parsed = dataset.map(DatasetName::parse);
    let components: Vec<&str> = match &parsed {
        Some(d) => d.name.split('/').skip(1).filter(|s| !s.is_empty()).collect(),
        None => Vec::new(),
    };

    let mut dir_obj = root_dir_obj;
    for component in components {
        let dir_dnode = mos.dnode(dir_obj)?;
        let child_zapobj = match &dir_dnode.bonus {
            Bonus::DslDirectory { child_dir_zapobj, .. } => *child_dir_zapobj,
            _ => {
                return Err(PoolError::NotFound(format!(
                    "object {} is not a DSL directory",
                    dir_obj
                )))
            }
        };
        let child_zap_dnode = mos.dnode(child_zapobj)?;
        let child_zap_data = child_zap_dnode.get_data(&mut |bp| pool.read_block(bp))?;
        let child_zap = Zap::parse(&child_zap_data)?;
        dir_obj = child_zap.get(component).ok_or_else(|| {
            PoolError::NotFound(format!("no child dataset named {}", component))
        })?;
    }

    let dir_dnode = mos.dnode(dir_obj)?;
    let head_dataset_obj = match &dir_dnode.bonus {
        Bonus::DslDirectory { head_dataset_obj, .. } => *head_dataset_obj,
        _ => {
            return Err(PoolError::NotFound(format!(
                "object {} is not a DSL directory",
                dir_obj
            )))
        }
    };

    let mut dataset_obj = head_dataset_obj;
    if let Some(snap_name) = parsed.as_ref().and_then(|d| d.snapshot.as_deref()) {
        let ds_dnode = mos.dnode(dataset_obj)?;
        let snapnames_zapobj = match &ds_dnode.bonus {
            Bonus::DslDataset { snapnames_zapobj, .. } => *snapnames_zapobj,
            _ => {
                return Err(PoolError::NotFound(format!(
                    "object {} is not a DSL dataset",
                    dataset_obj
                )))
            }
        };
        let snap_zap_dnode = mos.dnode(snapnames_zapobj)?;
        let snap_zap_data = snap_zap_dnode.get_data(&mut |bp| pool.read_block(bp))?;
        let snap_zap = Zap::parse(&snap_zap_data)?;
        dataset_obj = snap_zap.get(snap_name).ok_or_else(|| {
            PoolError::NotFound(format!("no snapshot named {}", snap_name))
        })?;
    }

    let ds_dnode = mos.dnode(dataset_obj)?;
    let ds_bp = match &ds_dnode.bonus {
        Bonus::DslDataset { bp, .. } => bp.as_ref(),
        _ => {
            return Err(PoolError::NotFound(format!(
                "object {} is not a DSL dataset",
                dataset_obj
            )))
        }
    };

    let objects = read_dataset_object_set(pool, ds_bp)?;
    let root_dir_obj = resolve_root_directory(pool, &objects)?;

    Ok(ResolvedDataset {
        object_id: dataset_obj,
        objects,
        root_dir_obj,
    })
}

/// Reads a dataset's own object set from its root block pointer (the
/// `ds_bp` embedded in its DSL-dataset bonus buffer).
fn read_dataset_object_set(pool: &ZfsPool, ds_bp: &Blkptr) -> zfs::Result<ObjectSet> {
    if ds_bp.is_hole() {
        return Ok(ObjectSet::from_data(&[]));
    }
    let objset_data = pool.read_block(ds_bp)?;
    read_object_set_from_objset_block(pool, &objset_data)
}

/// Looks up a dataset's root directory object id from its master-node ZAP
/// (object 1 of the dataset's own object set), the `"ROOT"` entry.
fn resolve_root_directory(pool: &ZfsPool, objects: &ObjectSet) -> Result<u64> {
    let master_node = objects.dnode(1)?;
    let master_data = master_node.get_data(&mut |bp| pool.read_block(bp))?;
    let master_zap = Zap::parse(&master_data)?;
    master_zap
        .get("ROOT")
        .ok_or_else(|| PoolError::NotFound("ROOT entry missing from dataset master node".to_string()))
}
