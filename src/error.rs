//! Crate-wide error type unifying the Btrfs and ZFS subsystems.
//!
//! Mirrors the teacher's per-subsystem `thiserror` pattern one level up:
//! [`BtrfsError`](crate::core::BtrfsError) and [`ZfsError`](crate::zfs::ZfsError)
//! each describe failures local to their own on-disk format; [`PoolError`]
//! is what the pool-dispatch and operations layers actually propagate, since
//! an operation can fail before either subsystem was even identified.

use thiserror::Error;

use crate::blockdev::BlockDeviceError;
use crate::core::BtrfsError;
use crate::zfs::ZfsError;

/// Errors surfaced by pool probing, construction, and the operations layer.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("not a recognized pool")]
    NotAPool,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated image: read past end of device")]
    TruncatedImage,

    #[error("bad magic: {0}")]
    BadMagic(String),

    #[error("checksum mismatch: expected {expected:?}, got {actual:?}")]
    ChecksumMismatch { expected: [u64; 4], actual: [u64; 4] },

    #[error("decompression failed: {0}")]
    DecompressFailed(String),

    #[error("no chunk maps logical address {logical}")]
    ChunkNotMapped { logical: u64 },

    #[error("device id {device_id} is not present in this pool")]
    DeviceMissing { device_id: u64 },

    #[error("unsupported layout: {0}")]
    UnsupportedLayout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("block device error: {0}")]
    BlockDevice(#[from] BlockDeviceError),

    #[error("btrfs error: {0}")]
    Btrfs(#[from] BtrfsError),

    #[error("zfs error: {0}")]
    Zfs(#[from] ZfsError),
}

pub type Result<T> = std::result::Result<T, PoolError>;
