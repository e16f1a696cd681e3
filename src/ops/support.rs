//! Btrfs subvolume resolution shared by `fls`, `istat`, and `icat`.
//!
//! The ZFS side of the same job lives in [`super::dataset`]; Btrfs has no
//! MOS/DSL directory to descend, so resolving `name` down to a [`Subvolume`]
//! is just a lookup against [`BtrfsFilesystem::list_subvolumes`].

use crate::core::{BtrfsFilesystem, Subvolume};
use crate::error::{PoolError, Result};

/// Resolves a subvolume by name, or the filesystem's default subvolume
/// (`FS_TREE`) when `name` is `None`.
pub fn resolve_subvolume(fs: &BtrfsFilesystem, name: Option<&str>) -> Result<Subvolume> {
    match name {
        None => Ok(fs.default_subvolume()?),
        Some(name) => fs
            .list_subvolumes()?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| PoolError::NotFound(format!("no subvolume named {}", name))),
    }
}
