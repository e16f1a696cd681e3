//! BTRFS Chunk tree implementation
//!
//! The chunk tree maps logical addresses to physical addresses on one or
//! more member devices. Bootstrapped from the superblock's inline system
//! chunk array (§4.7), later grown from the full chunk tree once the root
//! tree is walkable.

use super::{item_type, tree::BtrfsKey, BtrfsError, Result, Superblock};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::BTreeMap;

/// Canonical stripe length used when a chunk item is silent on it.
pub const DEFAULT_STRIPE_LEN: u64 = 0x10000;

/// A chunk mapping entry
#[derive(Debug, Clone)]
pub struct ChunkMapping {
    /// Logical address start
    pub logical: u64,
    /// Size of the chunk
    pub size: u64,
    /// Stripe length
    pub stripe_len: u64,
    /// Type flags
    pub type_flags: u64,
    /// Number of stripes
    pub num_stripes: u16,
    /// Sub stripes (RAID10 mirror count per column, always 2 in practice)
    pub sub_stripes: u16,
    /// Stripe information
    pub stripes: Vec<Stripe>,
}

/// A stripe within a chunk
#[derive(Debug, Clone)]
pub struct Stripe {
    /// Device ID
    pub devid: u64,
    /// Offset on device
    pub offset: u64,
    /// Device UUID
    pub dev_uuid: [u8; 16],
}

/// A resolved physical address on a specific member device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalAddr {
    pub devid: u64,
    pub offset: u64,
}

/// Chunk type flags
pub mod chunk_type {
    pub const DATA: u64 = 1 << 0;
    pub const SYSTEM: u64 = 1 << 1;
    pub const METADATA: u64 = 1 << 2;
    pub const RAID0: u64 = 1 << 3;
    pub const RAID1: u64 = 1 << 4;
    pub const DUP: u64 = 1 << 5;
    pub const RAID10: u64 = 1 << 6;
    pub const RAID5: u64 = 1 << 7;
    pub const RAID6: u64 = 1 << 8;
    pub const RAID1C3: u64 = 1 << 9;
    pub const RAID1C4: u64 = 1 << 10;
}

/// The chunk tree manages logical to physical address mappings
pub struct ChunkTree {
    /// Ordered map of logical address -> chunk mapping
    chunks: BTreeMap<u64, ChunkMapping>,
}

impl ChunkTree {
    /// Creates a chunk tree from the superblock's bootstrap chunks
    pub fn from_superblock(superblock: &Superblock) -> Result<Self> {
        let mut chunks = BTreeMap::new();

        let sys_chunk_array = superblock.sys_chunk_array();
        let mut offset = 0;

        while offset < sys_chunk_array.len() {
            if offset + 17 > sys_chunk_array.len() {
                break;
            }

            let key = BtrfsKey::from_bytes(&sys_chunk_array[offset..])?;
            offset += 17;

            if key.item_type != item_type::CHUNK_ITEM {
                return Err(BtrfsError::Corrupt(format!(
                    "Expected CHUNK_ITEM in sys_chunk_array, got {}",
                    key.item_type
                )));
            }

            if offset + 0x30 > sys_chunk_array.len() {
                break;
            }

            let chunk = Self::parse_chunk_item(&sys_chunk_array[offset..], key.offset)?;
            let chunk_size = 0x30 + chunk.num_stripes as usize * 0x20;
            offset += chunk_size;

            chunks.insert(chunk.logical, chunk);
        }

        Ok(Self { chunks })
    }

    /// Builds a chunk tree directly from a set of already-parsed mappings,
    /// used once the full chunk tree (rather than just the bootstrap set)
    /// has been walked.
    pub fn from_mappings(chunks: Vec<ChunkMapping>) -> Self {
        let mut map = BTreeMap::new();
        for chunk in chunks {
            map.insert(chunk.logical, chunk);
        }
        Self { chunks: map }
    }

    /// Merges additional chunk mappings discovered by walking the full
    /// chunk tree into this (initially bootstrap-only) set.
    pub fn extend(&mut self, chunks: impl IntoIterator<Item = ChunkMapping>) {
        for chunk in chunks {
            self.chunks.insert(chunk.logical, chunk);
        }
    }

    /// Parses a CHUNK_ITEM from bytes
    pub fn parse_chunk_item(data: &[u8], logical: u64) -> Result<ChunkMapping> {
        if data.len() < 0x30 {
            return Err(BtrfsError::Corrupt("CHUNK_ITEM too small".to_string()));
        }

        let size = LittleEndian::read_u64(&data[0..8]);
        let _owner = LittleEndian::read_u64(&data[8..16]);
        let mut stripe_len = LittleEndian::read_u64(&data[16..24]);
        let type_flags = LittleEndian::read_u64(&data[24..32]);
        let _io_align = LittleEndian::read_u32(&data[32..36]);
        let _io_width = LittleEndian::read_u32(&data[36..40]);
        let _sector_size = LittleEndian::read_u32(&data[40..44]);
        let num_stripes = LittleEndian::read_u16(&data[44..46]);
        let sub_stripes = LittleEndian::read_u16(&data[46..48]);

        if stripe_len == 0 {
            stripe_len = DEFAULT_STRIPE_LEN;
        }

        let mut stripes = Vec::with_capacity(num_stripes as usize);
        let mut offset = 0x30;

        for _ in 0..num_stripes {
            if offset + 0x20 > data.len() {
                return Err(BtrfsError::Corrupt("CHUNK_ITEM stripe data truncated".to_string()));
            }

            let devid = LittleEndian::read_u64(&data[offset..offset + 8]);
            let stripe_offset = LittleEndian::read_u64(&data[offset + 8..offset + 16]);
            let mut dev_uuid = [0u8; 16];
            dev_uuid.copy_from_slice(&data[offset + 16..offset + 32]);

            stripes.push(Stripe {
                devid,
                offset: stripe_offset,
                dev_uuid,
            });

            offset += 0x20;
        }

        Ok(ChunkMapping {
            logical,
            size,
            stripe_len,
            type_flags,
            num_stripes,
            sub_stripes,
            stripes,
        })
    }

    /// Finds the chunk item covering a logical address (§4.9: greatest
    /// `key.offset <= L` with `L < key.offset + chunk_size`).
    pub fn find_chunk(&self, logical: u64) -> Result<&ChunkMapping> {
        let chunk = self
            .chunks
            .range(..=logical)
            .next_back()
            .map(|(_, v)| v)
            .ok_or(BtrfsError::ChunkNotMapped { logical })?;

        if logical >= chunk.logical + chunk.size {
            return Err(BtrfsError::ChunkNotMapped { logical });
        }

        Ok(chunk)
    }

    /// Resolves a logical address to its candidate physical addresses,
    /// per the RAID-specific decomposition in §4.9. Callers pick the first
    /// available device among the returned candidates.
    pub fn resolve(&self, logical: u64) -> Result<Vec<PhysicalAddr>> {
        let chunk = self.find_chunk(logical)?;
        let rel = logical - chunk.logical;
        let stripe_len = chunk.stripe_len;
        let flags = chunk.type_flags;

        if flags & chunk_type::RAID0 != 0 {
            let n = chunk.num_stripes as u64;
            Ok(vec![raid0_addr(&chunk.stripes, n, stripe_len, rel)])
        } else if flags & chunk_type::RAID10 != 0 {
            let columns = (chunk.num_stripes / chunk.sub_stripes.max(1)) as u64;
            let stripe_nr = rel / stripe_len;
            let stripe_offset = rel % stripe_len;
            let column = (stripe_nr % columns) as usize;
            let col_off = (stripe_nr / columns) * stripe_len + stripe_offset;

            let legs = chunk.sub_stripes.max(1) as usize;
            let mut out = Vec::with_capacity(legs);
            for leg in 0..legs {
                let idx = leg + legs * column;
                if let Some(stripe) = chunk.stripes.get(idx) {
                    out.push(PhysicalAddr {
                        devid: stripe.devid,
                        offset: stripe.offset + col_off,
                    });
                }
            }
            Ok(out)
        } else if flags & chunk_type::RAID1 != 0 {
            Ok(chunk
                .stripes
                .iter()
                .map(|s| PhysicalAddr {
                    devid: s.devid,
                    offset: s.offset + rel,
                })
                .collect())
        } else if flags & (chunk_type::RAID5 | chunk_type::RAID6) != 0 {
            Err(BtrfsError::UnsupportedLayout(
                "RAID5/6 parity reconstruction is not supported".to_string(),
            ))
        } else {
            // SINGLE / DUP: all copies live at the same relative offset;
            // the first stripe is as good as any other.
            let stripe = chunk
                .stripes
                .first()
                .ok_or(BtrfsError::ChunkNotMapped { logical })?;
            Ok(vec![PhysicalAddr {
                devid: stripe.devid,
                offset: stripe.offset + rel,
            }])
        }
    }

    /// Stripe length governing split-reads for the chunk covering `logical`.
    pub fn stripe_len_at(&self, logical: u64) -> Result<u64> {
        Ok(self.find_chunk(logical)?.stripe_len)
    }

    /// Returns all chunks
    pub fn chunks(&self) -> &BTreeMap<u64, ChunkMapping> {
        &self.chunks
    }

    /// Adds a chunk mapping
    pub fn add_chunk(&mut self, chunk: ChunkMapping) {
        self.chunks.insert(chunk.logical, chunk);
    }
}

fn raid0_addr(stripes: &[Stripe], n: u64, stripe_len: u64, rel: u64) -> PhysicalAddr {
    let stripe_nr = rel / stripe_len;
    let stripe_offset = rel % stripe_len;
    let stripe_index = (stripe_nr % n) as usize;
    let stripe = &stripes[stripe_index];
    let physical = stripe.offset + (stripe_nr / n) * stripe_len + stripe_offset;
    PhysicalAddr {
        devid: stripe.devid,
        offset: physical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_type_flags() {
        assert_eq!(chunk_type::DATA, 1);
        assert_eq!(chunk_type::SYSTEM, 2);
        assert_eq!(chunk_type::METADATA, 4);
        assert_eq!(chunk_type::RAID0, 8);
        assert_eq!(chunk_type::RAID1, 16);
        assert_eq!(chunk_type::DUP, 32);
        assert_eq!(chunk_type::RAID10, 64);
        assert_eq!(chunk_type::RAID5, 128);
        assert_eq!(chunk_type::RAID6, 256);
        assert_eq!(chunk_type::RAID1C3, 512);
        assert_eq!(chunk_type::RAID1C4, 1024);
    }

    fn create_mock_chunk_item_data(num_stripes: u16, sub_stripes: u16, type_flags: u64) -> Vec<u8> {
        let mut data = vec![0u8; 0x30 + num_stripes as usize * 0x20];
        data[0..8].copy_from_slice(&0x10000000u64.to_le_bytes()); // 256MB
        data[8..16].copy_from_slice(&2u64.to_le_bytes());
        data[16..24].copy_from_slice(&0x10000u64.to_le_bytes()); // 64KB stripe_len
        data[24..32].copy_from_slice(&type_flags.to_le_bytes());
        data[32..36].copy_from_slice(&4096u32.to_le_bytes());
        data[36..40].copy_from_slice(&4096u32.to_le_bytes());
        data[40..44].copy_from_slice(&4096u32.to_le_bytes());
        data[44..46].copy_from_slice(&num_stripes.to_le_bytes());
        data[46..48].copy_from_slice(&sub_stripes.to_le_bytes());

        for i in 0..num_stripes {
            let offset = 0x30 + i as usize * 0x20;
            data[offset..offset + 8].copy_from_slice(&(i as u64 + 1).to_le_bytes());
            data[offset + 8..offset + 16]
                .copy_from_slice(&(0x100000u64 + i as u64 * 0x10000000).to_le_bytes());
            for j in 0..16 {
                data[offset + 16 + j] = (i as u8).wrapping_add(j as u8);
            }
        }

        data
    }

    #[test]
    fn test_parse_chunk_item_single() {
        let data = create_mock_chunk_item_data(1, 1, chunk_type::DATA);
        let chunk = ChunkTree::parse_chunk_item(&data, 0x1000000).unwrap();

        assert_eq!(chunk.logical, 0x1000000);
        assert_eq!(chunk.size, 0x10000000);
        assert_eq!(chunk.stripe_len, 0x10000);
        assert_eq!(chunk.type_flags, chunk_type::DATA);
        assert_eq!(chunk.num_stripes, 1);
        assert_eq!(chunk.stripes[0].devid, 1);
        assert_eq!(chunk.stripes[0].offset, 0x100000);
    }

    #[test]
    fn test_parse_chunk_item_too_small() {
        let data = vec![0u8; 0x20];
        assert!(ChunkTree::parse_chunk_item(&data, 0x1000000).is_err());
    }

    #[test]
    fn test_parse_chunk_item_stripe_truncated() {
        let mut data = create_mock_chunk_item_data(1, 1, chunk_type::DATA);
        data[44..46].copy_from_slice(&5u16.to_le_bytes());
        assert!(ChunkTree::parse_chunk_item(&data, 0x1000000).is_err());
    }

    fn tree_with(chunk: ChunkMapping) -> ChunkTree {
        ChunkTree::from_mappings(vec![chunk])
    }

    #[test]
    fn test_resolve_single() {
        let data = create_mock_chunk_item_data(1, 1, chunk_type::DATA);
        let chunk = ChunkTree::parse_chunk_item(&data, 0x1000000).unwrap();
        let tree = tree_with(chunk);

        let addrs = tree.resolve(0x1000100).unwrap();
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].devid, 1);
        assert_eq!(addrs[0].offset, 0x100000 + 0x100);
    }

    #[test]
    fn test_resolve_raid1_returns_all_stripes() {
        let data = create_mock_chunk_item_data(2, 1, chunk_type::DATA | chunk_type::RAID1);
        let chunk = ChunkTree::parse_chunk_item(&data, 0x1000000).unwrap();
        let tree = tree_with(chunk);

        let addrs = tree.resolve(0x1000100).unwrap();
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].devid, 1);
        assert_eq!(addrs[1].devid, 2);
        assert_eq!(addrs[0].offset, addrs[1].offset - 0x100000);
    }

    #[test]
    fn test_resolve_raid0_stripes_across_devices() {
        let data = create_mock_chunk_item_data(2, 1, chunk_type::DATA | chunk_type::RAID0);
        let chunk = ChunkTree::parse_chunk_item(&data, 0).unwrap();
        let tree = tree_with(chunk);

        // first stripe unit on device 1
        let a = tree.resolve(0).unwrap();
        assert_eq!(a[0].devid, 1);
        // second stripe unit (0x10000..0x20000) on device 2
        let b = tree.resolve(0x10000).unwrap();
        assert_eq!(b[0].devid, 2);
        // third stripe unit wraps back to device 1, second column
        let c = tree.resolve(0x20000).unwrap();
        assert_eq!(c[0].devid, 1);
        assert_eq!(c[0].offset, 0x100000 + 0x10000);
    }

    #[test]
    fn test_resolve_raid10_both_legs() {
        // 4 stripes, sub_stripes=2 => 2 mirrored columns
        let data = create_mock_chunk_item_data(4, 2, chunk_type::DATA | chunk_type::RAID10);
        let chunk = ChunkTree::parse_chunk_item(&data, 0).unwrap();
        let tree = tree_with(chunk);

        let addrs = tree.resolve(0).unwrap();
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].devid, 1);
        assert_eq!(addrs[1].devid, 2);
    }

    #[test]
    fn test_resolve_raid5_unsupported() {
        let data = create_mock_chunk_item_data(3, 1, chunk_type::DATA | chunk_type::RAID5);
        let chunk = ChunkTree::parse_chunk_item(&data, 0).unwrap();
        let tree = tree_with(chunk);

        match tree.resolve(0) {
            Err(BtrfsError::UnsupportedLayout(_)) => (),
            other => panic!("expected UnsupportedLayout, got {:?}", other),
        }
    }

    #[test]
    fn test_find_chunk_not_mapped() {
        let data = create_mock_chunk_item_data(1, 1, chunk_type::DATA);
        let chunk = ChunkTree::parse_chunk_item(&data, 0x1000000).unwrap();
        let tree = tree_with(chunk);

        match tree.find_chunk(0) {
            Err(BtrfsError::ChunkNotMapped { logical: 0 }) => (),
            other => panic!("expected ChunkNotMapped, got {:?}", other),
        }
    }
}
