//! Block pointers (`blkptr_t`) and their constituent DVAs.
//!
//! A block pointer names up to three on-disk locations (DVAs) for the same
//! logical block — ZFS writes extra copies for metadata and `copies=N`
//! datasets — plus its compression, checksum, and size metadata. "Embedded"
//! block pointers (`BP_EMBEDDED`) skip the DVAs entirely and pack small
//! objects directly into the otherwise-unused span of the pointer.

use super::{fletcher, Result, ZfsError};
use byteorder::{ByteOrder, LittleEndian};

/// Sectors are always 512 bytes on ZFS's own disk structures, independent
/// of the underlying device's physical sector size.
pub const SECTOR_SHIFT: u32 = 9;

/// Space reserved for the two front vdev labels and the boot block; DVA
/// offsets are relative to the end of this region.
pub const VDEV_LABEL_START_SIZE: u64 = 4 * 1024 * 1024;

/// Size of an on-disk block pointer.
pub const BLKPTR_SIZE: usize = 128;

/// A single device-virtual-address: which vdev, where, how large.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dva {
    pub vdev: u32,
    asize_sectors: u32,
    pub gang: bool,
    offset_sectors: u64,
}

impl Dva {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 16 {
            return Err(ZfsError::CorruptBlkptr("DVA too small".to_string()));
        }
        let word0 = LittleEndian::read_u64(&data[0..8]);
        let word1 = LittleEndian::read_u64(&data[8..16]);

        let vdev = (word0 >> 32) as u32;
        let asize_sectors = (word0 & 0x00FF_FFFF) as u32;
        let gang = word1 >> 63 != 0;
        let offset_sectors = word1 & 0x7FFF_FFFF_FFFF_FFFF;

        Ok(Self {
            vdev,
            asize_sectors,
            gang,
            offset_sectors,
        })
    }

    /// Allocated size in bytes (the DVA stores sectors-minus-one).
    pub fn asize(&self) -> u64 {
        (self.asize_sectors as u64 + 1) << SECTOR_SHIFT
    }

    /// Physical byte offset within the vdev, past the reserved label space.
    pub fn physical_offset(&self) -> u64 {
        (self.offset_sectors << SECTOR_SHIFT) + VDEV_LABEL_START_SIZE
    }

    /// Byte offset before the reserved label space is added back in.
    ///
    /// RAIDZ column math operates on this raw address (dividing it across
    /// columns) before the label offset is reapplied per-column at actual
    /// read time, so callers doing that math need it unshifted.
    pub fn raw_offset_bytes(&self) -> u64 {
        self.offset_sectors << SECTOR_SHIFT
    }

    pub fn is_empty(&self) -> bool {
        self.vdev == 0 && self.offset_sectors == 0 && self.asize_sectors == 0
    }
}

/// A parsed block pointer.
#[derive(Debug, Clone)]
pub struct Blkptr {
    pub dva: [Dva; 3],
    pub lsize: u64,
    pub psize: u64,
    pub compress: u8,
    pub embedded: bool,
    pub object_type: u8,
    pub checksum_type: u8,
    pub level: u8,
    pub phys_birth: u64,
    pub birth: u64,
    pub fill: u64,
    pub checksum: [u64; 4],
    /// Raw bytes of the pointer, retained so embedded payloads (which are
    /// packed across the DVA + padding span) can be sliced out on demand.
    raw: Vec<u8>,
}

impl Blkptr {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < BLKPTR_SIZE {
            return Err(ZfsError::CorruptBlkptr(format!(
                "block pointer too small: {} bytes",
                data.len()
            )));
        }

        let prop = LittleEndian::read_u64(&data[48..56]);
        let lsize_sectors = prop & 0xFFFF;
        let psize_sectors = (prop >> 16) & 0xFFFF;
        let compress = ((prop >> 32) & 0x7F) as u8;
        let embedded = (prop >> 39) & 1 != 0;
        let checksum_type = ((prop >> 40) & 0xFF) as u8;
        let object_type = ((prop >> 48) & 0xFF) as u8;
        let level = ((prop >> 56) & 0x1F) as u8;

        let phys_birth = LittleEndian::read_u64(&data[72..80]);
        let birth = LittleEndian::read_u64(&data[80..88]);
        let fill = LittleEndian::read_u64(&data[88..96]);

        let mut checksum = [0u64; 4];
        for (i, chunk) in data[96..128].chunks_exact(8).enumerate() {
            checksum[i] = LittleEndian::read_u64(chunk);
        }

        let dva = if embedded {
            [
                Dva {
                    vdev: 0,
                    asize_sectors: 0,
                    gang: false,
                    offset_sectors: 0,
                },
                Dva {
                    vdev: 0,
                    asize_sectors: 0,
                    gang: false,
                    offset_sectors: 0,
                },
                Dva {
                    vdev: 0,
                    asize_sectors: 0,
                    gang: false,
                    offset_sectors: 0,
                },
            ]
        } else {
            [
                Dva::from_bytes(&data[0..16])?,
                Dva::from_bytes(&data[16..32])?,
                Dva::from_bytes(&data[32..48])?,
            ]
        };

        let lsize = if embedded {
            lsize_sectors + 1
        } else {
            (lsize_sectors + 1) << SECTOR_SHIFT
        };
        let psize = if embedded {
            psize_sectors + 1
        } else {
            (psize_sectors + 1) << SECTOR_SHIFT
        };

        Ok(Self {
            dva,
            lsize,
            psize,
            compress,
            embedded,
            object_type,
            checksum_type,
            level,
            phys_birth,
            birth,
            fill,
            checksum,
            raw: data[..BLKPTR_SIZE].to_vec(),
        })
    }

    pub fn is_hole(&self) -> bool {
        !self.embedded && self.dva.iter().all(|d| d.is_empty()) && self.birth == 0
    }

    /// Verifies the payload's Fletcher-4 checksum against `blk_cksum`.
    pub fn verify_checksum(&self, payload: &[u8]) -> bool {
        fletcher::verify(payload, self.checksum)
    }

    /// Reassembles an embedded block pointer's payload. Real ZFS packs up
    /// to 112 bytes across the three (unused) DVA slots, the low half of
    /// the `prop` word's padding, and the birth-time span; we mirror that
    /// span exactly: `0x00..0x30`, `0x38..0x50`, `0x58..0x80`.
    pub fn embedded_payload(&self) -> Result<Vec<u8>> {
        if !self.embedded {
            return Err(ZfsError::CorruptBlkptr(
                "not an embedded block pointer".to_string(),
            ));
        }
        let mut span = Vec::with_capacity(48 + 24 + 40);
        span.extend_from_slice(&self.raw[0x00..0x30]);
        span.extend_from_slice(&self.raw[0x38..0x50]);
        span.extend_from_slice(&self.raw[0x58..0x80]);
        span.truncate(self.psize as usize);
        Ok(span)
    }
}
