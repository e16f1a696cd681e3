//! BTRFS filesystem core implementation
//!
//! This module provides a read-only reader for the BTRFS on-disk format:
//! superblock, chunk tree, generic B-tree, and the inode/dir-entry/extent
//! items layered on top of it.

pub mod checksum;
pub mod chunk;
pub mod compress;
pub mod inode;
pub mod subvolume;
pub mod superblock;
pub mod tree;

use crate::blockdev::BlockDevice;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub use checksum::Checksum;
pub use chunk::{ChunkTree, PhysicalAddr};
pub use compress::CompressionType;
pub use inode::{Inode, InodeType};
pub use subvolume::Subvolume;
pub use superblock::{DevItem, Superblock};
pub use tree::{BtrfsKey, BtrfsTree, TreeType};

/// BTRFS magic number: "_BHRfS_M"
pub const BTRFS_MAGIC: [u8; 8] = *b"_BHRfS_M";

/// Primary superblock offset (64 KiB)
pub const SUPERBLOCK_OFFSET: u64 = 0x10000;

/// First superblock mirror offset (64 MiB)
pub const SUPERBLOCK_MIRROR1_OFFSET: u64 = 0x4000000;

/// Second superblock mirror offset (256 GiB)
pub const SUPERBLOCK_MIRROR2_OFFSET: u64 = 0x4000000000;

/// Default node size
pub const DEFAULT_NODE_SIZE: u32 = 16384;

/// Default sector size
pub const DEFAULT_SECTOR_SIZE: u32 = 4096;

/// Errors that can occur during BTRFS operations
#[derive(Error, Debug)]
pub enum BtrfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Block device error: {0}")]
    BlockDevice(#[from] crate::blockdev::BlockDeviceError),

    #[error("Invalid magic number")]
    InvalidMagic,

    #[error("Checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Unsupported BTRFS feature: {0}")]
    UnsupportedFeature(String),

    #[error("Corrupt filesystem: {0}")]
    Corrupt(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Invalid tree type: {0}")]
    InvalidTreeType(u8),

    #[error("Decompression error: {0}")]
    DecompressionError(String),

    #[error("Compression not supported: {0}")]
    UnsupportedCompression(u8),

    #[error("Invalid inode: {0}")]
    InvalidInode(u64),

    #[error("Not a directory")]
    NotADirectory,

    #[error("Not a file")]
    NotAFile,

    #[error("Subvolume not found: {0}")]
    SubvolumeNotFound(u64),

    #[error("No chunk maps logical address {logical}")]
    ChunkNotMapped { logical: u64 },

    #[error("Device id {device_id} is not present in this pool")]
    DeviceMissing { device_id: u64 },

    #[error("Unsupported layout: {0}")]
    UnsupportedLayout(String),
}

pub type Result<T> = std::result::Result<T, BtrfsError>;

/// One member device of a (possibly multi-device) Btrfs pool.
struct Member {
    reader: Arc<dyn BlockDevice>,
    available: bool,
}

/// A BTRFS filesystem instance. May span one or more member devices
/// (multi-device RAID0/1/10 pools); always keyed by the on-disk `devid`
/// recovered from each device's own superblock `dev_item`, per §4.7.
pub struct BtrfsFilesystem {
    /// Member devices keyed by devid
    devices: BTreeMap<u64, Member>,

    /// The primary superblock (the one the chunk/root trees bootstrap from)
    superblock: Superblock,

    /// The chunk tree for address translation
    chunk_tree: ChunkTree,

    /// Whether the filesystem is mounted read-only
    read_only: bool,
}

impl BtrfsFilesystem {
    /// Opens a single-device BTRFS filesystem.
    pub fn open(device: Arc<dyn BlockDevice>, read_only: bool) -> Result<Self> {
        Self::open_pool(vec![device], read_only)
    }

    /// Opens a BTRFS filesystem that may span multiple devices. The first
    /// image able to produce a valid superblock becomes primary; every
    /// image's `dev_item` is read to populate the device map (mirrors
    /// `BTRFS_POOL.cpp`'s per-image device-id discovery loop).
    pub fn open_pool(readers: Vec<Arc<dyn BlockDevice>>, read_only: bool) -> Result<Self> {
        if readers.is_empty() {
            return Err(BtrfsError::Corrupt("no devices supplied".to_string()));
        }

        let mut superblock: Option<Superblock> = None;
        let mut devices = BTreeMap::new();

        for reader in &readers {
            let sb = match Superblock::read(reader.as_ref()) {
                Ok(sb) => sb,
                Err(e) => {
                    warn!("skipping device that failed superblock parse: {}", e);
                    continue;
                }
            };
            let dev_item = sb.dev_item()?;
            devices.insert(
                dev_item.devid,
                Member {
                    reader: reader.clone(),
                    available: true,
                },
            );
            if superblock.is_none() {
                superblock = Some(sb);
            }
        }

        let superblock = superblock.ok_or(BtrfsError::InvalidMagic)?;
        debug!(
            "opened btrfs pool: {} of {} devices present",
            devices.len(),
            superblock.num_devices()
        );

        let chunk_tree = ChunkTree::from_superblock(&superblock)?;

        let mut fs = Self {
            devices,
            superblock,
            chunk_tree,
            read_only,
        };

        if let Err(e) = fs.load_chunk_tree() {
            warn!("full chunk tree walk failed, bootstrap chunks only: {}", e);
        }

        Ok(fs)
    }

    /// Walks the on-disk chunk tree (§4.7's "recursively, the chunk tree
    /// provides logical→physical for any later metadata") and folds every
    /// `CHUNK_ITEM` it finds into the bootstrap-only chunk map built from
    /// the superblock's inline system chunks.
    fn load_chunk_tree(&mut self) -> Result<()> {
        let root_logical = self.superblock.chunk_root();
        let root_level = self.superblock.chunk_root_level();

        let mut discovered = Vec::new();
        {
            let tree = BtrfsTree::new(self, root_logical, root_level);
            for entry in tree.iter() {
                let (item, data) = entry?;
                if item.key.item_type != item_type::CHUNK_ITEM {
                    continue;
                }
                if let Ok(chunk) = ChunkTree::parse_chunk_item(&data, item.key.offset) {
                    discovered.push(chunk);
                }
            }
        }

        debug!("walked chunk tree: {} chunk items found", discovered.len());
        self.chunk_tree.extend(discovered);
        Ok(())
    }

    /// Returns the superblock
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Returns the chunk tree
    pub fn chunk_tree(&self) -> &ChunkTree {
        &self.chunk_tree
    }

    /// Returns the chunk tree mutably, so it can be grown with mappings
    /// discovered by walking the full on-disk chunk tree.
    pub fn chunk_tree_mut(&mut self) -> &mut ChunkTree {
        &mut self.chunk_tree
    }

    /// Returns the primary device (the one the superblock was read from),
    /// falling back to any available device if it is somehow absent.
    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        let primary_id = self.superblock.dev_item().ok().map(|d| d.devid);
        primary_id
            .and_then(|id| self.devices.get(&id))
            .or_else(|| self.devices.values().next())
            .map(|m| &m.reader)
            .expect("at least one device present")
    }

    /// Number of devices this pool expects, per the superblock.
    pub fn expected_devices(&self) -> u64 {
        self.superblock.num_devices()
    }

    /// Number of devices actually opened and readable.
    pub fn available_devices(&self) -> usize {
        self.devices.values().filter(|m| m.available).count()
    }

    /// Returns the filesystem UUID
    pub fn uuid(&self) -> uuid::Uuid {
        self.superblock.fsid()
    }

    /// Returns the filesystem label
    pub fn label(&self) -> &str {
        self.superblock.label()
    }

    /// Returns the total size of the filesystem in bytes
    pub fn total_bytes(&self) -> u64 {
        self.superblock.total_bytes()
    }

    /// Returns the used bytes
    pub fn bytes_used(&self) -> u64 {
        self.superblock.bytes_used()
    }

    /// Returns whether the filesystem is mounted read-only
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns the node size
    pub fn node_size(&self) -> u32 {
        self.superblock.node_size()
    }

    /// Translates a logical address to its candidate physical addresses.
    pub fn logical_to_physical(&self, logical: u64) -> Result<Vec<PhysicalAddr>> {
        self.chunk_tree.resolve(logical)
    }

    /// Reads the first available candidate among `addrs` into `buf`,
    /// zero-filling on total miss (§4.9, §7's missing-device policy).
    fn read_first_available(&self, addrs: &[PhysicalAddr], buf: &mut [u8]) -> Result<()> {
        for addr in addrs {
            if let Some(member) = self.devices.get(&addr.devid) {
                if member.available {
                    match member.reader.read_at(addr.offset, buf) {
                        Ok(_) => return Ok(()),
                        Err(e) => {
                            warn!("read failed on device {}: {}", addr.devid, e);
                            continue;
                        }
                    }
                }
            }
        }
        warn!(
            "no reachable device among {} candidates; zero-filling",
            addrs.len()
        );
        buf.fill(0);
        Ok(())
    }

    /// Reads data from a logical address, splitting the read at stripe
    /// boundaries per §4.9 so a request spanning multiple stripe units is
    /// served correctly under RAID0/10.
    pub fn read_logical(&self, logical: u64, buf: &mut [u8]) -> Result<usize> {
        let total = buf.len();
        let mut done = 0usize;
        let mut cur = logical;

        while done < total {
            let chunk = self.chunk_tree.find_chunk(cur)?;
            let stripe_len = chunk.stripe_len.max(1);
            let rel = cur - chunk.logical;
            let size_for_stripe = (stripe_len - (rel % stripe_len)) as usize;
            let remaining = total - done;
            let n = size_for_stripe.min(remaining);

            let addrs = self.chunk_tree.resolve(cur)?;
            self.read_first_available(&addrs, &mut buf[done..done + n])?;

            done += n;
            cur += n as u64;
        }

        Ok(done)
    }

    /// Reads a tree node from a logical address
    pub fn read_node(&self, logical: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.node_size() as usize];
        self.read_logical(logical, &mut buf)?;
        Ok(buf)
    }

    /// Opens the root tree (the tree of trees), whose root item lookups
    /// resolve every other tree root, including per-subvolume FS trees.
    pub fn root_tree(&self) -> BtrfsTree<'_> {
        BtrfsTree::new(self, self.superblock.root(), self.superblock.root_level())
    }

    /// Opens the tree whose root is a given FS tree / subvolume id, found
    /// via that id's `ROOT_ITEM` in the root tree.
    pub fn subvolume_tree(&self, tree_id: u64) -> Result<BtrfsTree<'_>> {
        let key = BtrfsKey::new(tree_id, item_type::ROOT_ITEM, u64::MAX);
        let root_tree = self.root_tree();
        let items = root_tree.search_range(
            &BtrfsKey::new(tree_id, item_type::ROOT_ITEM, 0),
            &key,
        )?;
        let (_, data) = items
            .into_iter()
            .max_by_key(|(item, _)| item.key.offset)
            .ok_or(BtrfsError::SubvolumeNotFound(tree_id))?;
        let root_item = subvolume::RootItem::from_bytes(&data)?;
        Ok(BtrfsTree::new(self, root_item.bytenr, root_item.level))
    }

    /// Lists all subvolumes in the filesystem
    pub fn list_subvolumes(&self) -> Result<Vec<Subvolume>> {
        subvolume::list_subvolumes(self)
    }

    /// Gets a subvolume by ID
    pub fn get_subvolume(&self, id: u64) -> Result<Subvolume> {
        subvolume::get_subvolume(self, id)
    }

    /// Gets the default subvolume. The root filesystem tree's object id is
    /// fixed at `FS_TREE` (5); `root_dir_objectid` names the default entry
    /// *within* that tree, not an alternate tree root, so it is read but
    /// not substituted here.
    pub fn default_subvolume(&self) -> Result<Subvolume> {
        self.get_subvolume(objectid::FS_TREE)
    }
}

/// Object IDs for well-known trees
pub mod objectid {
    /// Root tree object ID
    pub const ROOT_TREE: u64 = 1;
    /// Extent tree object ID
    pub const EXTENT_TREE: u64 = 2;
    /// Chunk tree object ID
    pub const CHUNK_TREE: u64 = 3;
    /// Dev tree object ID
    pub const DEV_TREE: u64 = 4;
    /// FS tree object ID
    pub const FS_TREE: u64 = 5;
    /// Root tree directory object ID
    pub const ROOT_TREE_DIR: u64 = 6;
    /// Checksum tree object ID
    pub const CSUM_TREE: u64 = 7;
    /// Quota tree object ID
    pub const QUOTA_TREE: u64 = 8;
    /// UUID tree object ID
    pub const UUID_TREE: u64 = 9;
    /// Free space tree object ID
    pub const FREE_SPACE_TREE: u64 = 10;
    /// First free object ID for subvolumes
    pub const FIRST_FREE: u64 = 256;
    /// Last free object ID
    pub const LAST_FREE: u64 = u64::MAX - 256;
}

/// Item types in BTRFS trees
pub mod item_type {
    pub const INODE_ITEM: u8 = 0x01;
    pub const INODE_REF: u8 = 0x0C;
    pub const INODE_EXTREF: u8 = 0x0D;
    pub const XATTR_ITEM: u8 = 0x18;
    pub const ORPHAN_ITEM: u8 = 0x30;
    pub const DIR_LOG_ITEM: u8 = 0x3C;
    pub const DIR_LOG_INDEX: u8 = 0x48;
    pub const DIR_ITEM: u8 = 0x54;
    pub const DIR_INDEX: u8 = 0x60;
    pub const EXTENT_DATA: u8 = 0x6C;
    pub const EXTENT_CSUM: u8 = 0x80;
    pub const ROOT_ITEM: u8 = 0x84;
    pub const ROOT_BACKREF: u8 = 0x90;
    pub const ROOT_REF: u8 = 0x9C;
    pub const EXTENT_ITEM: u8 = 0xA8;
    pub const METADATA_ITEM: u8 = 0xA9;
    pub const TREE_BLOCK_REF: u8 = 0xB0;
    pub const EXTENT_DATA_REF: u8 = 0xB2;
    pub const SHARED_BLOCK_REF: u8 = 0xB6;
    pub const SHARED_DATA_REF: u8 = 0xB8;
    pub const BLOCK_GROUP_ITEM: u8 = 0xC0;
    pub const DEV_EXTENT: u8 = 0xCC;
    pub const DEV_ITEM: u8 = 0xD8;
    pub const CHUNK_ITEM: u8 = 0xE4;
    pub const STRING_ITEM: u8 = 0xFD;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_btrfs_constants() {
        assert_eq!(BTRFS_MAGIC, *b"_BHRfS_M");
        assert_eq!(SUPERBLOCK_OFFSET, 0x10000);
        assert_eq!(SUPERBLOCK_MIRROR1_OFFSET, 0x4000000);
        assert_eq!(SUPERBLOCK_MIRROR2_OFFSET, 0x4000000000);
        assert_eq!(DEFAULT_NODE_SIZE, 16384);
        assert_eq!(DEFAULT_SECTOR_SIZE, 4096);
    }

    #[test]
    fn test_objectid_constants() {
        assert_eq!(objectid::ROOT_TREE, 1);
        assert_eq!(objectid::EXTENT_TREE, 2);
        assert_eq!(objectid::CHUNK_TREE, 3);
        assert_eq!(objectid::DEV_TREE, 4);
        assert_eq!(objectid::FS_TREE, 5);
        assert_eq!(objectid::ROOT_TREE_DIR, 6);
        assert_eq!(objectid::CSUM_TREE, 7);
        assert_eq!(objectid::QUOTA_TREE, 8);
        assert_eq!(objectid::UUID_TREE, 9);
        assert_eq!(objectid::FREE_SPACE_TREE, 10);
        assert_eq!(objectid::FIRST_FREE, 256);
        assert_eq!(objectid::LAST_FREE, u64::MAX - 256);
    }

    #[test]
    fn test_item_type_constants() {
        assert_eq!(item_type::INODE_ITEM, 0x01);
        assert_eq!(item_type::INODE_REF, 0x0C);
        assert_eq!(item_type::INODE_EXTREF, 0x0D);
        assert_eq!(item_type::XATTR_ITEM, 0x18);
        assert_eq!(item_type::ORPHAN_ITEM, 0x30);
        assert_eq!(item_type::DIR_LOG_ITEM, 0x3C);
        assert_eq!(item_type::DIR_LOG_INDEX, 0x48);
        assert_eq!(item_type::DIR_ITEM, 0x54);
        assert_eq!(item_type::DIR_INDEX, 0x60);
        assert_eq!(item_type::EXTENT_DATA, 0x6C);
        assert_eq!(item_type::EXTENT_CSUM, 0x80);
        assert_eq!(item_type::ROOT_ITEM, 0x84);
        assert_eq!(item_type::ROOT_BACKREF, 0x90);
        assert_eq!(item_type::ROOT_REF, 0x9C);
        assert_eq!(item_type::EXTENT_ITEM, 0xA8);
        assert_eq!(item_type::METADATA_ITEM, 0xA9);
        assert_eq!(item_type::TREE_BLOCK_REF, 0xB0);
        assert_eq!(item_type::EXTENT_DATA_REF, 0xB2);
        assert_eq!(item_type::SHARED_BLOCK_REF, 0xB6);
        assert_eq!(item_type::SHARED_DATA_REF, 0xB8);
        assert_eq!(item_type::BLOCK_GROUP_ITEM, 0xC0);
        assert_eq!(item_type::DEV_EXTENT, 0xCC);
        assert_eq!(item_type::DEV_ITEM, 0xD8);
        assert_eq!(item_type::CHUNK_ITEM, 0xE4);
        assert_eq!(item_type::STRING_ITEM, 0xFD);
    }

    #[test]
    fn test_btrfs_error_display() {
        let err = BtrfsError::InvalidMagic;
        assert!(format!("{}", err).contains("magic"));

        let err = BtrfsError::ChecksumMismatch {
            expected: 0x12345678,
            actual: 0x87654321,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("12345678"));
        assert!(msg.contains("87654321"));

        let err = BtrfsError::UnsupportedFeature("test feature".to_string());
        assert!(format!("{}", err).contains("test feature"));

        let err = BtrfsError::Corrupt("corruption details".to_string());
        assert!(format!("{}", err).contains("corruption details"));

        let err = BtrfsError::NotFound("missing item".to_string());
        assert!(format!("{}", err).contains("missing item"));

        let err = BtrfsError::InvalidTreeType(42);
        assert!(format!("{}", err).contains("42"));

        let err = BtrfsError::DecompressionError("zstd failed".to_string());
        assert!(format!("{}", err).contains("zstd failed"));

        let err = BtrfsError::UnsupportedCompression(99);
        assert!(format!("{}", err).contains("99"));

        let err = BtrfsError::InvalidInode(256);
        assert!(format!("{}", err).contains("256"));

        let err = BtrfsError::NotADirectory;
        assert!(format!("{}", err).contains("directory"));

        let err = BtrfsError::NotAFile;
        assert!(format!("{}", err).contains("file"));

        let err = BtrfsError::SubvolumeNotFound(1000);
        assert!(format!("{}", err).contains("1000"));
    }

    #[test]
    fn test_btrfs_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let btrfs_err: BtrfsError = io_err.into();
        match btrfs_err {
            BtrfsError::Io(_) => (),
            _ => panic!("Expected Io error variant"),
        }
    }

    #[test]
    fn test_btrfs_error_from_block_device() {
        let bd_err = crate::blockdev::BlockDeviceError::NotFound("test".to_string());
        let btrfs_err: BtrfsError = bd_err.into();
        match btrfs_err {
            BtrfsError::BlockDevice(_) => (),
            _ => panic!("Expected BlockDevice error variant"),
        }
    }
}
