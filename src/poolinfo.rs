//! Opens every image file in a directory as a pool member.
//!
//! Mirrors `ZFS_POOL`/`BTRFS_POOL`'s own constructors, which are always
//! handed a directory of already-split image files rather than a single
//! monolithic image: this module is the one place that walks a directory
//! and binds each file to a [`BlockDevice`].

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::blockdev::{self, BlockDevice};
use crate::error::{PoolError, Result};

/// The opened device images backing a pool, keyed by file name.
///
/// Construction never recurses into subdirectories — each pool's images
/// are expected to sit directly inside the given directory, one file per
/// member device.
pub struct PoolInfo {
    devices: Vec<(String, Arc<dyn BlockDevice>)>,
}

impl PoolInfo {
    /// Opens every non-directory entry under `dir` as a read-only image.
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|e| {
            PoolError::NotFound(format!("{}: {}", dir.display(), e))
        })?;

        let mut devices = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PoolError::NotFound(e.to_string()))?;
            let path = entry.path();

            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let path_str = path.to_string_lossy().into_owned();
            match blockdev::open(&path_str, true) {
                Ok(device) => devices.push((name, Arc::from(device))),
                Err(e) => warn!("skipping {}: {}", path_str, e),
            }
        }

        if devices.is_empty() {
            return Err(PoolError::NotFound(format!(
                "no readable image files in {}",
                dir.display()
            )));
        }

        // Stable ordering so "first image scanned" (used to break ties in
        // uberblock txg selection and to pick the primary Btrfs superblock)
        // is deterministic across runs.
        devices.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self { devices })
    }

    /// Names of every opened member image, in scan order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(|(name, _)| name.as_str())
    }

    /// The opened devices in scan order, as handed to pool construction.
    pub fn devices(&self) -> Vec<Arc<dyn BlockDevice>> {
        self.devices.iter().map(|(_, d)| Arc::clone(d)).collect()
    }

    /// The first opened device, used for the initial pool-kind probe.
    pub fn first(&self) -> Option<&Arc<dyn BlockDevice>> {
        self.devices.first().map(|(_, d)| d)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
