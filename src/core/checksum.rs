//! Checksum utilities for BTRFS
//!
//! BTRFS uses CRC32c checksums for data integrity verification.
//! All hot-path functions are marked inline for performance.

use super::{BtrfsError, Result};

/// Checksum algorithms supported by BTRFS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    /// CRC32c (Castagnoli)
    Crc32c,
    /// XXHash64 (not yet implemented)
    XxHash64,
    /// SHA256 (not yet implemented)
    Sha256,
    /// Blake2b (not yet implemented)
    Blake2b,
}

impl Checksum {
    /// Returns the checksum type from a numeric value
    #[inline]
    pub fn from_type(csum_type: u16) -> Result<Self> {
        match csum_type {
            0 => Ok(Self::Crc32c),
            1 => Ok(Self::XxHash64),
            2 => Ok(Self::Sha256),
            3 => Ok(Self::Blake2b),
            _ => Err(BtrfsError::UnsupportedFeature(format!(
                "Unknown checksum type: {}",
                csum_type
            ))),
        }
    }

    /// Returns the size of the checksum in bytes
    #[inline]
    pub const fn size(&self) -> usize {
        match self {
            Self::Crc32c => 4,
            Self::XxHash64 => 8,
            Self::Sha256 => 32,
            Self::Blake2b => 32,
        }
    }
}

/// Computes a CRC32c checksum
/// 
/// This is a hot path - marked inline for performance
#[inline]
pub fn crc32c(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Computes a CRC32c checksum incrementally (for streaming)
#[inline]
pub fn crc32c_append(crc: u32, data: &[u8]) -> u32 {
    crc32c::crc32c_append(crc, data)
}

/// Verifies a CRC32c checksum
#[inline]
pub fn verify_crc32c(data: &[u8], expected: u32) -> Result<()> {
    let actual = crc32c(data);
    if actual != expected {
        return Err(BtrfsError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// Computes a checksum for a tree node
/// 
/// Node checksum covers everything after the checksum field (offset 0x20)
#[inline]
pub fn compute_node_checksum(data: &[u8]) -> u32 {
    if data.len() > 0x20 {
        crc32c(&data[0x20..])
    } else {
        0
    }
}

/// Verifies a tree node checksum
pub fn verify_node_checksum(data: &[u8]) -> Result<()> {
    if data.len() < 0x24 {
        return Err(BtrfsError::Corrupt(
            "Node too small for checksum".to_string(),
        ));
    }

    let expected = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let actual = compute_node_checksum(data);

    if expected != actual {
        return Err(BtrfsError::ChecksumMismatch { expected, actual });
    }

    Ok(())
}
