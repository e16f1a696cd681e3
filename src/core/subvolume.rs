//! BTRFS Subvolume and snapshot support
//!
//! Subvolumes are independent filesystem trees that can be mounted separately.

use super::{item_type, objectid, tree::BtrfsKey, BtrfsError, BtrfsFilesystem, Result};
use byteorder::{ByteOrder, LittleEndian};

/// A BTRFS subvolume
#[derive(Debug, Clone)]
pub struct Subvolume {
    /// Subvolume ID (object ID)
    pub id: u64,
    /// Parent subvolume ID (0 for top-level)
    pub parent_id: u64,
    /// Generation when created
    pub generation: u64,
    /// Generation of parent (for snapshots)
    pub parent_generation: u64,
    /// Flags
    pub flags: u64,
    /// UUID
    pub uuid: [u8; 16],
    /// Parent UUID (for snapshots)
    pub parent_uuid: [u8; 16],
    /// Received UUID (for send/receive)
    pub received_uuid: [u8; 16],
    /// Creation time
    pub otime: TimeSpec,
    /// Send time
    pub stime: TimeSpec,
    /// Receive time
    pub rtime: TimeSpec,
    /// Name
    pub name: String,
    /// Path relative to top-level
    pub path: String,
    /// Root tree logical address
    pub root_bytenr: u64,
    /// Root level
    pub root_level: u8,
    /// Objectid of the root directory within this subvolume's own tree
    pub root_dirid: u64,
}

/// Time specification
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeSpec {
    pub sec: i64,
    pub nsec: u32,
}

/// Subvolume flags
pub mod subvol_flags {
    /// Subvolume is read-only
    pub const RDONLY: u64 = 1 << 0;
}

/// Root item structure from the root tree
#[derive(Debug, Clone)]
pub struct RootItem {
    /// Inode item
    pub inode: RootInode,
    /// Generation
    pub generation: u64,
    /// Root directory ID
    pub root_dirid: u64,
    /// Byte number of root node
    pub bytenr: u64,
    /// Byte limit
    pub byte_limit: u64,
    /// Bytes used
    pub bytes_used: u64,
    /// Last snapshot generation
    pub last_snapshot: u64,
    /// Flags
    pub flags: u64,
    /// Number of references
    pub refs: u32,
    /// Drop progress key
    pub drop_progress: BtrfsKey,
    /// Drop level
    pub drop_level: u8,
    /// Root level
    pub level: u8,
    /// Generation v2
    pub generation_v2: u64,
    /// UUID
    pub uuid: [u8; 16],
    /// Parent UUID
    pub parent_uuid: [u8; 16],
    /// Received UUID
    pub received_uuid: [u8; 16],
    /// Transaction ID for creation
    pub ctransid: u64,
    /// Transaction ID for last modification
    pub otransid: u64,
    /// Transaction ID for send
    pub stransid: u64,
    /// Transaction ID for receive
    pub rtransid: u64,
    /// Creation time
    pub ctime: TimeSpec,
    /// Last modification time
    pub otime: TimeSpec,
    /// Send time
    pub stime: TimeSpec,
    /// Receive time
    pub rtime: TimeSpec,
}

/// Root inode embedded in root item
#[derive(Debug, Clone, Default)]
pub struct RootInode {
    pub generation: u64,
    pub transid: u64,
    pub size: u64,
    pub nbytes: u64,
    pub block_group: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub rdev: u64,
    pub flags: u64,
    pub sequence: u64,
}

impl RootItem {
    /// Parses a root item from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 439 {
            return Err(BtrfsError::Corrupt(format!(
                "Root item too small: {} bytes",
                data.len()
            )));
        }

        // Parse embedded inode
        let inode = RootInode {
            generation: LittleEndian::read_u64(&data[0..8]),
            transid: LittleEndian::read_u64(&data[8..16]),
            size: LittleEndian::read_u64(&data[16..24]),
            nbytes: LittleEndian::read_u64(&data[24..32]),
            block_group: LittleEndian::read_u64(&data[32..40]),
            nlink: LittleEndian::read_u32(&data[40..44]),
            uid: LittleEndian::read_u32(&data[44..48]),
            gid: LittleEndian::read_u32(&data[48..52]),
            mode: LittleEndian::read_u32(&data[52..56]),
            rdev: LittleEndian::read_u64(&data[56..64]),
            flags: LittleEndian::read_u64(&data[64..72]),
            sequence: LittleEndian::read_u64(&data[72..80]),
        };

        let generation = LittleEndian::read_u64(&data[160..168]);
        let root_dirid = LittleEndian::read_u64(&data[168..176]);
        let bytenr = LittleEndian::read_u64(&data[176..184]);
        let byte_limit = LittleEndian::read_u64(&data[184..192]);
        let bytes_used = LittleEndian::read_u64(&data[192..200]);
        let last_snapshot = LittleEndian::read_u64(&data[200..208]);
        let flags = LittleEndian::read_u64(&data[208..216]);
        let refs = LittleEndian::read_u32(&data[216..220]);

        let drop_progress = BtrfsKey::from_bytes(&data[220..237])?;
        let drop_level = data[237];
        let level = data[238];

        // Generation v2 and UUIDs
        let generation_v2 = LittleEndian::read_u64(&data[239..247]);

        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&data[247..263]);

        let mut parent_uuid = [0u8; 16];
        parent_uuid.copy_from_slice(&data[263..279]);

        let mut received_uuid = [0u8; 16];
        received_uuid.copy_from_slice(&data[279..295]);

        let ctransid = LittleEndian::read_u64(&data[295..303]);
        let otransid = LittleEndian::read_u64(&data[303..311]);
        let stransid = LittleEndian::read_u64(&data[311..319]);
        let rtransid = LittleEndian::read_u64(&data[319..327]);

        let ctime = TimeSpec {
            sec: LittleEndian::read_i64(&data[327..335]),
            nsec: LittleEndian::read_u32(&data[335..339]),
        };
        let otime = TimeSpec {
            sec: LittleEndian::read_i64(&data[339..347]),
            nsec: LittleEndian::read_u32(&data[347..351]),
        };
        let stime = TimeSpec {
            sec: LittleEndian::read_i64(&data[351..359]),
            nsec: LittleEndian::read_u32(&data[359..363]),
        };
        let rtime = TimeSpec {
            sec: LittleEndian::read_i64(&data[363..371]),
            nsec: LittleEndian::read_u32(&data[371..375]),
        };

        Ok(Self {
            inode,
            generation,
            root_dirid,
            bytenr,
            byte_limit,
            bytes_used,
            last_snapshot,
            flags,
            refs,
            drop_progress,
            drop_level,
            level,
            generation_v2,
            uuid,
            parent_uuid,
            received_uuid,
            ctransid,
            otransid,
            stransid,
            rtransid,
            ctime,
            otime,
            stime,
            rtime,
        })
    }

    /// Returns true if this is a read-only subvolume
    pub fn is_readonly(&self) -> bool {
        self.flags & subvol_flags::RDONLY != 0
    }
}

/// A `ROOT_REF`/`ROOT_BACKREF` item: the name under which one subvolume is
/// linked into its parent's directory tree.
#[derive(Debug, Clone)]
pub struct RootRef {
    pub dirid: u64,
    pub sequence: u64,
    pub name: String,
}

impl RootRef {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 18 {
            return Err(BtrfsError::Corrupt("root ref too small".to_string()));
        }
        let dirid = LittleEndian::read_u64(&data[0..8]);
        let sequence = LittleEndian::read_u64(&data[8..16]);
        let name_len = LittleEndian::read_u16(&data[16..18]) as usize;
        let name_end = 18 + name_len;
        if data.len() < name_end {
            return Err(BtrfsError::Corrupt("root ref name truncated".to_string()));
        }
        let name = String::from_utf8_lossy(&data[18..name_end]).into_owned();
        Ok(Self {
            dirid,
            sequence,
            name,
        })
    }
}

/// Lists all subvolumes in the filesystem.
///
/// Walks the root tree once, collecting every `ROOT_ITEM` with an objectid
/// at or past `FIRST_FREE` alongside any `ROOT_BACKREF` naming it, the same
/// pair of item types `BTRFS_POOL.cpp`'s `fsstat()` filters for when
/// enumerating subvolumes and snapshots.
pub fn list_subvolumes(fs: &BtrfsFilesystem) -> Result<Vec<Subvolume>> {
    let mut subvolumes = Vec::new();
    subvolumes.push(get_subvolume(fs, objectid::FS_TREE)?);

    let root_tree = fs.root_tree();
    let mut root_items: std::collections::BTreeMap<u64, (u64, RootItem)> =
        std::collections::BTreeMap::new();
    let mut refs: std::collections::HashMap<u64, (String, u64)> = std::collections::HashMap::new();

    for entry in root_tree.iter() {
        let (item, data) = entry?;
        let key_objectid = item.key.objectid;
        let key_type = item.key.item_type;
        let key_offset = item.key.offset;

        if key_objectid < objectid::FIRST_FREE {
            continue;
        }

        if key_type == item_type::ROOT_ITEM {
            if let Ok(root_item) = RootItem::from_bytes(&data) {
                let better = root_items
                    .get(&key_objectid)
                    .map(|(existing_offset, _)| key_offset >= *existing_offset)
                    .unwrap_or(true);
                if better {
                    root_items.insert(key_objectid, (key_offset, root_item));
                }
            }
        } else if key_type == item_type::ROOT_BACKREF {
            if let Ok(root_ref) = RootRef::from_bytes(&data) {
                refs.insert(key_objectid, (root_ref.name, key_offset));
            }
        }
    }

    for (id, (_, root_item)) in root_items {
        let (name, parent_id) = refs
            .get(&id)
            .cloned()
            .unwrap_or_else(|| (format!("subvol_{}", id), 0));
        subvolumes.push(subvolume_from_root_item(id, parent_id, &name, &root_item));
    }

    Ok(subvolumes)
}

fn subvolume_from_root_item(id: u64, parent_id: u64, name: &str, root_item: &RootItem) -> Subvolume {
    Subvolume {
        id,
        parent_id,
        generation: root_item.generation,
        parent_generation: 0,
        flags: root_item.flags,
        uuid: root_item.uuid,
        parent_uuid: root_item.parent_uuid,
        received_uuid: root_item.received_uuid,
        otime: root_item.otime,
        stime: root_item.stime,
        rtime: root_item.rtime,
        name: name.to_string(),
        path: format!("/{}", name),
        root_bytenr: root_item.bytenr,
        root_level: root_item.level,
        root_dirid: root_item.root_dirid,
    }
}

/// Gets a subvolume by ID.
pub fn get_subvolume(fs: &BtrfsFilesystem, id: u64) -> Result<Subvolume> {
    // For the default FS tree, use superblock info
    if id == objectid::FS_TREE {
        return Ok(Subvolume {
            id: objectid::FS_TREE,
            parent_id: 0,
            generation: fs.superblock().generation(),
            parent_generation: 0,
            flags: 0,
            uuid: [0; 16],
            parent_uuid: [0; 16],
            received_uuid: [0; 16],
            otime: TimeSpec::default(),
            stime: TimeSpec::default(),
            rtime: TimeSpec::default(),
            name: String::from("(FS_TREE)"),
            path: String::from("/"),
            root_bytenr: fs.superblock().root(),
            root_level: fs.superblock().root_level(),
            root_dirid: fs.superblock().root_dir_objectid(),
        });
    }

    let root_tree = fs.root_tree();
    let root_items = root_tree.search_range(
        &BtrfsKey::new(id, item_type::ROOT_ITEM, 0),
        &BtrfsKey::new(id, item_type::ROOT_ITEM, u64::MAX),
    )?;
    let (_, data) = root_items
        .into_iter()
        .max_by_key(|(item, _)| item.key.offset)
        .ok_or(BtrfsError::SubvolumeNotFound(id))?;
    let root_item = RootItem::from_bytes(&data)?;

    let backrefs = root_tree.search_range(
        &BtrfsKey::new(id, item_type::ROOT_BACKREF, 0),
        &BtrfsKey::new(id, item_type::ROOT_BACKREF, u64::MAX),
    )?;
    let (name, parent_id) = backrefs
        .into_iter()
        .find_map(|(item, data)| RootRef::from_bytes(&data).ok().map(|r| (r.name, item.key.offset)))
        .unwrap_or_else(|| (format!("subvol_{}", id), 0));

    Ok(subvolume_from_root_item(id, parent_id, &name, &root_item))
}
