//! Forensic pool examiner
//!
//! A read-only, userspace examiner for ZFS and Btrfs storage pools backed by
//! disk images. Given one or more image files it reconstructs the pool's
//! device topology, walks its on-disk metadata trees, and exposes the
//! filesystem objects (datasets/subvolumes, inodes, directory entries) found
//! inside.
//!
//! # Architecture
//!
//! - [`blockdev`]: block device abstraction over image files
//! - [`core`]: Btrfs on-disk format (superblock, chunk tree, b-tree, inodes)
//! - [`zfs`]: ZFS on-disk format (NVList, vdev tree, uberblock, DMU, ZAP)
//! - [`pool`]: pool-kind detection and the unified [`pool::Pool`] handle
//! - [`poolinfo`]: opening a pool from a directory of member images
//! - [`ops`]: filesystem-agnostic operations (`fsstat`, `fls`, `istat`, `icat`, `fwalk`)
//! - [`error`]: the crate-wide [`error::PoolError`]

pub mod blockdev;
pub mod core;
pub mod error;
pub mod ops;
pub mod pool;
pub mod poolinfo;
pub mod zfs;

pub use blockdev::{BlockDevice, BlockDeviceError};
pub use core::{
    BtrfsError, BtrfsFilesystem, BtrfsKey, CompressionType, Inode, InodeType, Subvolume,
    Superblock, TreeType,
};
pub use error::PoolError;
pub use pool::Pool;
pub use poolinfo::PoolInfo;
pub use zfs::{ZfsError, ZfsPool};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
