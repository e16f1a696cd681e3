//! The DMU object layer: dnodes and object sets.
//!
//! Every ZFS object (a file, a directory's ZAP, a dataset's metadata) is a
//! 512-byte `dnode_phys_t`. An object set is itself a dnode (the "meta
//! dnode") whose data is simply an array of 512-byte dnodes — the objects
//! that live in that object set.

use super::{Blkptr, Result, ZfsError};
use byteorder::{ByteOrder, LittleEndian};

/// Size of one on-disk dnode.
pub const DNODE_SIZE: usize = 512;

/// Well-known DMU object types relevant to reading a pool read-only.
pub mod object_type {
    pub const DSL_DATASET: u8 = 16;
    pub const DSL_DIR: u8 = 12;
    pub const ZNODE: u8 = 44;
    pub const DIRECTORY_CONTENTS: u8 = 21;
    pub const PLAIN_FILE_CONTENTS: u8 = 19;
}

/// A dnode's type-specific "bonus buffer" contents.
#[derive(Debug, Clone)]
pub enum Bonus {
    DslDataset {
        dir_obj: u64,
        prev_snap_obj: u64,
        prev_snap_txg: u64,
        next_snap_obj: u64,
        snapnames_zapobj: u64,
        num_children: u64,
        creation_time: u64,
        creation_txg: u64,
        used_bytes: u64,
        compressed_bytes: u64,
        uncompressed_bytes: u64,
        unique_bytes: u64,
        guid: u64,
        bp: Box<Blkptr>,
    },
    DslDirectory {
        creation_time: u64,
        head_dataset_obj: u64,
        parent_obj: u64,
        child_dir_zapobj: u64,
    },
    Znode {
        atime: u64,
        mtime: u64,
        ctime: u64,
        crtime: u64,
        size: u64,
        parent: u64,
    },
    Raw(Vec<u8>),
}

/// A single DMU object: its block pointers and type-specific bonus data.
#[derive(Debug, Clone)]
pub struct Dnode {
    pub object_type: u8,
    pub indblkshift: u8,
    pub nlevels: u8,
    pub nblkptr: u8,
    pub bonustype: u8,
    pub datablkszsec: u16,
    pub bonuslen: u16,
    pub maxblkid: u64,
    pub blkptr: Vec<Blkptr>,
    pub bonus: Bonus,
}

impl Dnode {
    /// Parses one 512-byte dnode slot.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < DNODE_SIZE {
            return Err(ZfsError::CorruptDnode(format!(
                "dnode too small: {} bytes",
                data.len()
            )));
        }

        let object_type = data[0];
        let indblkshift = data[1];
        let nlevels = data[2];
        let nblkptr = data[3];
        let bonustype = data[4];
        let datablkszsec = LittleEndian::read_u16(&data[8..10]);
        let bonuslen = LittleEndian::read_u16(&data[10..12]);
        let maxblkid = LittleEndian::read_u64(&data[16..24]);

        if nlevels == 0 || nlevels > 8 {
            return Err(ZfsError::CorruptDnode(format!(
                "invalid nlevels: {}",
                nlevels
            )));
        }
        if nblkptr > 3 {
            return Err(ZfsError::CorruptDnode(format!(
                "invalid nblkptr: {}",
                nblkptr
            )));
        }

        let mut blkptr = Vec::with_capacity(nblkptr as usize);
        for i in 0..nblkptr as usize {
            let start = 64 + i * super::blkptr::BLKPTR_SIZE;
            let end = start + super::blkptr::BLKPTR_SIZE;
            if end > data.len() {
                break;
            }
            if let Ok(bp) = Blkptr::from_bytes(&data[start..end]) {
                blkptr.push(bp);
            }
        }

        let bonus_offset = 64 + nblkptr as usize * super::blkptr::BLKPTR_SIZE;
        let bonus_end = (bonus_offset + bonuslen as usize).min(data.len());
        let bonus_data = if bonus_offset < data.len() {
            &data[bonus_offset..bonus_end]
        } else {
            &[]
        };
        let bonus = Self::parse_bonus(bonustype, bonus_data);

        Ok(Self {
            object_type,
            indblkshift,
            nlevels,
            nblkptr,
            bonustype,
            datablkszsec,
            bonuslen,
            maxblkid,
            blkptr,
            bonus,
        })
    }

    fn parse_bonus(bonustype: u8, data: &[u8]) -> Bonus {
        match bonustype {
            object_type::DSL_DIR if data.len() >= 40 => Bonus::DslDirectory {
                creation_time: LittleEndian::read_u64(&data[0..8]),
                head_dataset_obj: LittleEndian::read_u64(&data[8..16]),
                parent_obj: LittleEndian::read_u64(&data[16..24]),
                // offset 24 is dd_origin_obj, skipped
                child_dir_zapobj: LittleEndian::read_u64(&data[32..40]),
            },
            object_type::ZNODE if data.len() >= 128 => Bonus::Znode {
                atime: LittleEndian::read_u64(&data[64..72]),
                mtime: LittleEndian::read_u64(&data[80..88]),
                ctime: LittleEndian::read_u64(&data[96..104]),
                crtime: LittleEndian::read_u64(&data[112..120]),
                size: LittleEndian::read_u64(&data[16..24]),
                parent: LittleEndian::read_u64(&data[48..56]),
            },
            object_type::DSL_DATASET if data.len() >= 128 + super::blkptr::BLKPTR_SIZE => {
                let bp = Blkptr::from_bytes(&data[128..128 + super::blkptr::BLKPTR_SIZE]).ok();
                Bonus::DslDataset {
                    dir_obj: LittleEndian::read_u64(&data[0..8]),
                    prev_snap_obj: LittleEndian::read_u64(&data[8..16]),
                    prev_snap_txg: LittleEndian::read_u64(&data[16..24]),
                    next_snap_obj: LittleEndian::read_u64(&data[24..32]),
                    snapnames_zapobj: LittleEndian::read_u64(&data[32..40]),
                    num_children: LittleEndian::read_u64(&data[40..48]),
                    creation_time: LittleEndian::read_u64(&data[48..56]),
                    creation_txg: LittleEndian::read_u64(&data[56..64]),
                    // offset 64 is dd_deadlist_obj, skipped
                    used_bytes: LittleEndian::read_u64(&data[72..80]),
                    compressed_bytes: LittleEndian::read_u64(&data[80..88]),
                    uncompressed_bytes: LittleEndian::read_u64(&data[88..96]),
                    unique_bytes: LittleEndian::read_u64(&data[96..104]),
                    // offset 104 is dd_fsid_guid, skipped
                    guid: LittleEndian::read_u64(&data[112..120]),
                    bp: Box::new(bp.unwrap_or_else(|| {
                        Blkptr::from_bytes(&[0u8; super::blkptr::BLKPTR_SIZE]).expect("zeroed blkptr parses")
                    })),
                }
            }
            _ => Bonus::Raw(data.to_vec()),
        }
    }

    /// Resolves this object's block pointer tree and returns its full,
    /// decompressed content. `read_block` reads and decompresses a single
    /// physical block referenced by a leaf-level (level 0) block pointer;
    /// indirect levels are arrays of block pointers and are walked here.
    pub fn get_data<F>(&self, read_block: &mut F) -> Result<Vec<u8>>
    where
        F: FnMut(&Blkptr) -> Result<Vec<u8>>,
    {
        // A DSL dataset with no direct block pointers stores its root
        // block pointer in the bonus buffer instead.
        if self.blkptr.is_empty() {
            if let Bonus::DslDataset { bp, .. } = &self.bonus {
                return resolve_bp(bp, self.nlevels.max(1) - 1, read_block);
            }
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for bp in &self.blkptr {
            out.extend(resolve_bp(bp, self.nlevels - 1, read_block)?);
        }
        Ok(out)
    }
}

/// Recursively reads a block pointer's subtree. `level` is the number of
/// indirection levels remaining below `bp` (0 means `bp` itself is a leaf).
fn resolve_bp<F>(bp: &Blkptr, level: u8, read_block: &mut F) -> Result<Vec<u8>>
where
    F: FnMut(&Blkptr) -> Result<Vec<u8>>,
{
    if bp.is_hole() {
        return Ok(vec![0u8; bp.lsize as usize]);
    }

    if bp.embedded {
        return bp.embedded_payload();
    }

    // A sub-BP that can't be dereferenced (missing device, bad checksum)
    // doesn't abort the whole walk: it's replaced with zeros of the
    // pointer's own declared logical size so the parent's layout stays intact.
    let block = match read_block(bp) {
        Ok(block) => block,
        Err(_) => return Ok(vec![0u8; bp.lsize as usize]),
    };

    if level == 0 {
        return Ok(block);
    }

    let mut out = Vec::new();
    for chunk in block.chunks(super::blkptr::BLKPTR_SIZE) {
        if chunk.len() < super::blkptr::BLKPTR_SIZE {
            break;
        }
        if let Ok(child) = Blkptr::from_bytes(chunk) {
            out.extend(resolve_bp(&child, level - 1, read_block)?);
        }
    }
    Ok(out)
}

/// An object set: a meta-dnode whose data is an array of 512-byte dnodes.
pub struct ObjectSet {
    dnodes: Vec<Option<Dnode>>,
}

impl ObjectSet {
    /// Builds an object set from its meta-dnode's already-resolved data.
    pub fn from_data(data: &[u8]) -> Self {
        let dnodes = data
            .chunks(DNODE_SIZE)
            .map(|chunk| {
                if chunk.len() < DNODE_SIZE {
                    None
                } else {
                    Dnode::from_bytes(chunk).ok()
                }
            })
            .collect();
        Self { dnodes }
    }

    pub fn dnode(&self, object_id: u64) -> Result<&Dnode> {
        self.dnodes
            .get(object_id as usize)
            .and_then(|d| d.as_ref())
            .ok_or(ZfsError::ObjectNotFound(object_id))
    }

    pub fn len(&self) -> usize {
        self.dnodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dnodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_dnode_bytes(object_type: u8, nlevels: u8, nblkptr: u8) -> Vec<u8> {
        let mut data = vec![0u8; DNODE_SIZE];
        data[0] = object_type;
        data[2] = nlevels;
        data[3] = nblkptr;
        LittleEndian::write_u64(&mut data[16..24], 0); // maxblkid
        data
    }

    #[test]
    fn test_parse_dnode_basic() {
        let data = mock_dnode_bytes(object_type::PLAIN_FILE_CONTENTS, 1, 1);
        let dn = Dnode::from_bytes(&data).unwrap();
        assert_eq!(dn.object_type, object_type::PLAIN_FILE_CONTENTS);
        assert_eq!(dn.nlevels, 1);
        assert_eq!(dn.blkptr.len(), 1);
    }

    #[test]
    fn test_invalid_nlevels() {
        let data = mock_dnode_bytes(19, 9, 1);
        assert!(Dnode::from_bytes(&data).is_err());
    }

    #[test]
    fn test_invalid_nblkptr() {
        let mut data = mock_dnode_bytes(19, 1, 0);
        data[3] = 4;
        assert!(Dnode::from_bytes(&data).is_err());
    }

    #[test]
    fn test_get_data_single_level() {
        let data = mock_dnode_bytes(object_type::PLAIN_FILE_CONTENTS, 1, 1);
        let dn = Dnode::from_bytes(&data).unwrap();
        // blk_dva all zero => is_hole() true => zero-filled lsize bytes
        let mut reads = 0;
        let result = dn
            .get_data(&mut |_bp| {
                reads += 1;
                Ok(vec![0u8; 512])
            })
            .unwrap();
        assert_eq!(reads, 0); // hole, never calls read_block
        assert_eq!(result.len(), dn.blkptr[0].lsize as usize);
    }

    #[test]
    fn test_object_set_dnode_lookup() {
        let mut data = vec![0u8; DNODE_SIZE * 3];
        let dn1 = mock_dnode_bytes(object_type::ZNODE, 1, 1);
        data[DNODE_SIZE..DNODE_SIZE * 2].copy_from_slice(&dn1);

        let os = ObjectSet::from_data(&data);
        assert_eq!(os.len(), 3);
        assert!(os.dnode(0).is_err()); // all-zero dnode: nlevels=0, fails parse
        assert!(os.dnode(1).is_ok());
    }
}
