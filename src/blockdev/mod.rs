//! Block device abstraction layer
//!
//! This module provides a unified interface for accessing storage backends.
//! Every pool member, Btrfs device or ZFS vdev leaf, is opened as an image
//! file backing a [`BlockDevice`].

pub mod image;

use thiserror::Error;

pub use image::ImageFile;

/// Errors that can occur during block device operations
#[derive(Error, Debug)]
pub enum BlockDeviceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid offset: {offset} (device size: {size})")]
    InvalidOffset { offset: u64, size: u64 },

    #[error("Read beyond end of device")]
    ReadBeyondEnd,
}

pub type Result<T> = std::result::Result<T, BlockDeviceError>;

/// Trait for read-only block device access.
///
/// This crate never writes to a pool member; every device it opens backs
/// a [`super::poolinfo::PoolInfo`]-owned image for the lifetime of an
/// examination.
pub trait BlockDevice: Send + Sync {
    /// Returns the total size of the device in bytes
    fn size(&self) -> u64;

    /// Returns the sector size of the device
    fn sector_size(&self) -> u32;

    /// Reads data at the specified offset
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

/// Opens a block device from the given path.
pub fn open(path: &str, read_only: bool) -> Result<Box<dyn BlockDevice>> {
    Ok(Box::new(ImageFile::open(path, read_only)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_device_error_display() {
        let err = BlockDeviceError::NotFound("test".to_string());
        assert_eq!(format!("{}", err), "Device not found: test");

        let err = BlockDeviceError::AccessDenied("test".to_string());
        assert_eq!(format!("{}", err), "Access denied: test");

        let err = BlockDeviceError::InvalidOffset {
            offset: 1000,
            size: 500,
        };
        assert!(format!("{}", err).contains("1000"));
        assert!(format!("{}", err).contains("500"));

        let err = BlockDeviceError::ReadBeyondEnd;
        assert!(format!("{}", err).contains("beyond"));
    }

    #[test]
    fn test_open_image_file() {
        use tempfile::NamedTempFile;

        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_str().unwrap();

        // Create a small file
        std::fs::write(path, vec![0u8; 1024]).unwrap();

        let device = open(path, true).unwrap();
        assert_eq!(device.size(), 1024);
    }

    #[test]
    fn test_open_nonexistent_file() {
        let result = open("/nonexistent/path/to/file.img", true);
        assert!(result.is_err());
    }
}
