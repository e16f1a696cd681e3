//! Uberblocks: the transaction-group roots of a ZFS pool.
//!
//! Each vdev label carries 128 uberblock slots; the valid uberblock with
//! the highest transaction group number names the current state of the
//! pool. Recovery tools can also select an older, specific txg to roll
//! back to a known-good point in time.

use super::{layout, Blkptr, Result, ZfsError};
use byteorder::{ByteOrder, LittleEndian};

/// Magic number identifying a valid uberblock, always stored big-endian
/// on disk regardless of pool byte order.
pub const UBERBLOCK_MAGIC: u64 = 0x00bab10c;

/// One uberblock: a transaction group's root block pointer plus metadata.
#[derive(Debug, Clone)]
pub struct Uberblock {
    pub version: u64,
    pub txg: u64,
    pub guid_sum: u64,
    pub timestamp: u64,
    pub rootbp: Blkptr,
}

impl Uberblock {
    /// Parses one uberblock slot. Fails (rather than erroring loudly) on a
    /// magic mismatch so callers scanning the full array can simply skip
    /// unused or torn slots.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 40 + super::blkptr::BLKPTR_SIZE {
            return Err(ZfsError::CorruptBlkptr("uberblock too small".to_string()));
        }

        let magic = LittleEndian::read_u64(&data[0..8]);
        if magic != UBERBLOCK_MAGIC {
            return Err(ZfsError::InvalidUberblockMagic);
        }

        let version = LittleEndian::read_u64(&data[8..16]);
        let txg = LittleEndian::read_u64(&data[16..24]);
        let guid_sum = LittleEndian::read_u64(&data[24..32]);
        let timestamp = LittleEndian::read_u64(&data[32..40]);
        let rootbp = Blkptr::from_bytes(&data[40..40 + super::blkptr::BLKPTR_SIZE])?;

        Ok(Self {
            version,
            txg,
            guid_sum,
            timestamp,
            rootbp,
        })
    }
}

/// The 128-slot uberblock array read from one label, with the
/// highest-transaction-group uberblock already picked out.
pub struct UberblockArray {
    slots: Vec<Option<Uberblock>>,
}

impl UberblockArray {
    /// Parses every slot in a label's uberblock region, tolerating
    /// individually corrupt or unwritten slots.
    pub fn parse(data: &[u8]) -> Self {
        let slot_size = layout::UBERBLOCK_SIZE as usize;
        let mut slots = Vec::with_capacity(layout::UBERBLOCK_COUNT as usize);

        for i in 0..layout::UBERBLOCK_COUNT as usize {
            let start = i * slot_size;
            let end = start + slot_size;
            if end > data.len() {
                slots.push(None);
                continue;
            }
            slots.push(Uberblock::from_bytes(&data[start..end]).ok());
        }

        Self { slots }
    }

    /// Returns the uberblock with the highest transaction group.
    pub fn most_recent(&self) -> Option<&Uberblock> {
        self.slots
            .iter()
            .flatten()
            .max_by_key(|ub| ub.txg)
    }

    /// Returns the uberblock for a specific transaction group, for
    /// rolling back to a known point before corruption or a bad write.
    pub fn by_txg(&self, txg: u64) -> Option<&Uberblock> {
        self.slots.iter().flatten().find(|ub| ub.txg == txg)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Uberblock> {
        self.slots.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zfs::blkptr::BLKPTR_SIZE;

    fn mock_uberblock_bytes(txg: u64) -> Vec<u8> {
        let mut data = vec![0u8; 40 + BLKPTR_SIZE];
        LittleEndian::write_u64(&mut data[0..8], UBERBLOCK_MAGIC);
        LittleEndian::write_u64(&mut data[8..16], 5000); // version
        LittleEndian::write_u64(&mut data[16..24], txg);
        LittleEndian::write_u64(&mut data[24..32], 0x1234);
        LittleEndian::write_u64(&mut data[32..40], 1_700_000_000);
        data
    }

    #[test]
    fn test_parse_uberblock() {
        let data = mock_uberblock_bytes(100);
        let ub = Uberblock::from_bytes(&data).unwrap();
        assert_eq!(ub.txg, 100);
        assert_eq!(ub.version, 5000);
    }

    #[test]
    fn test_invalid_magic() {
        let mut data = mock_uberblock_bytes(100);
        data[0] = 0;
        assert!(matches!(
            Uberblock::from_bytes(&data),
            Err(ZfsError::InvalidUberblockMagic)
        ));
    }

    #[test]
    fn test_array_picks_highest_txg() {
        let slot_size = layout::UBERBLOCK_SIZE as usize;
        let mut data = vec![0u8; slot_size * 4];

        data[0..40 + BLKPTR_SIZE].copy_from_slice(&mock_uberblock_bytes(10));
        data[slot_size..slot_size + 40 + BLKPTR_SIZE].copy_from_slice(&mock_uberblock_bytes(50));
        data[slot_size * 2..slot_size * 2 + 40 + BLKPTR_SIZE].copy_from_slice(&mock_uberblock_bytes(30));
        // slot 3 left zeroed (invalid magic, skipped)

        let arr = UberblockArray::parse(&data);
        assert_eq!(arr.most_recent().unwrap().txg, 50);
        assert_eq!(arr.by_txg(30).unwrap().txg, 30);
        assert!(arr.by_txg(999).is_none());
    }
}
