//! ZFS on-disk format implementation
//!
//! Enough of the ZFS on-disk format to open a pool read-only and walk its
//! metadata: the NVList encoding used for pool/vdev labels, the vdev tree,
//! uberblocks, block pointers, the DMU's dnode/object-set layer, and the
//! micro/fat ZAP directory formats.

pub mod blkptr;
pub mod compress;
pub mod dmu;
pub mod fletcher;
pub mod nvlist;
pub mod pool;
pub mod uberblock;
pub mod vdev;
pub mod zap;

use thiserror::Error;

pub use blkptr::{Blkptr, Dva};
pub use dmu::{Dnode, ObjectSet};
pub use nvlist::NvList;
pub use pool::ZfsPool;
pub use uberblock::{Uberblock, UberblockArray};
pub use vdev::{Vdev, VdevKind};
pub use zap::Zap;

/// Errors that can occur during ZFS parsing and traversal.
#[derive(Error, Debug)]
pub enum ZfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Block device error: {0}")]
    BlockDevice(#[from] crate::blockdev::BlockDeviceError),

    #[error("Invalid NVList encoding: {0}")]
    InvalidNvList(String),

    #[error("NVList key not found: {0}")]
    NvListKeyNotFound(String),

    #[error("No valid uberblock found")]
    NoValidUberblock,

    #[error("Invalid uberblock magic")]
    InvalidUberblockMagic,

    #[error("Corrupt block pointer: {0}")]
    CorruptBlkptr(String),

    #[error("Checksum mismatch: expected {expected:?}, got {actual:?}")]
    ChecksumMismatch { expected: [u64; 4], actual: [u64; 4] },

    #[error("Unsupported compression algorithm: {0}")]
    UnsupportedCompression(u8),

    #[error("Decompression failed: {0}")]
    DecompressionError(String),

    #[error("Corrupt dnode: {0}")]
    CorruptDnode(String),

    #[error("Corrupt ZAP object: {0}")]
    CorruptZap(String),

    #[error("ZAP entry not found: {0}")]
    ZapEntryNotFound(String),

    #[error("Vdev {0} is not usable (too many missing children)")]
    VdevNotUsable(u64),

    #[error("Device id {0} is not present in this pool")]
    DeviceMissing(u64),

    #[error("Unsupported RAIDZ layout: {0}")]
    UnsupportedRaidz(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(u64),

    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),
}

pub type Result<T> = std::result::Result<T, ZfsError>;

/// Sector/label geometry, mirrored from `zfs_vdev_label_sizes`.
pub mod layout {
    /// Size of one vdev label (there are 4: 2 at the front, 2 at the back).
    pub const VDEV_LABEL_SIZE: u64 = 256 * 1024;
    /// Offset of the packed NVList within a label.
    pub const VDEV_PHYS_OFFSET: u64 = 16 * 1024;
    /// Size of the packed NVList region within a label.
    pub const VDEV_PHYS_SIZE: u64 = 112 * 1024;
    /// Offset of the uberblock array within a label.
    pub const UBERBLOCK_OFFSET: u64 = 128 * 1024;
    /// Total size of the uberblock array within a label.
    pub const UBERBLOCK_ARRAY_SIZE: u64 = 128 * 1024;
    /// Size of a single uberblock slot.
    pub const UBERBLOCK_SIZE: u64 = 1024;
    /// Number of uberblock slots per label.
    pub const UBERBLOCK_COUNT: u64 = UBERBLOCK_ARRAY_SIZE / UBERBLOCK_SIZE;
}
