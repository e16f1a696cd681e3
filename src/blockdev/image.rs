//! Image file access
//!
//! Provides read-only access to pool member images stored as regular files.

use super::{BlockDevice, BlockDeviceError, Result};
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::RwLock;

/// Default sector size for image files
const DEFAULT_SECTOR_SIZE: u32 = 512;

/// An image file backed block device
pub struct ImageFile {
    file: RwLock<File>,
    mmap: Option<Mmap>,
    size: u64,
}

impl ImageFile {
    /// Opens an image file for read-only access.
    ///
    /// `read_only` is accepted for call-site symmetry with
    /// [`super::open`] but every image is opened read-only regardless —
    /// this crate never writes to pool members.
    pub fn open<P: AsRef<Path>>(path: P, _read_only: bool) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let metadata = file.metadata()?;
        let size = metadata.len();

        let mmap = if size > 0 {
            unsafe { MmapOptions::new().map(&file) }.ok()
        } else {
            None
        };

        Ok(Self {
            file: RwLock::new(file),
            mmap,
            size,
        })
    }
}

impl BlockDevice for ImageFile {
    fn size(&self) -> u64 {
        self.size
    }

    fn sector_size(&self) -> u32 {
        DEFAULT_SECTOR_SIZE
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size {
            return Err(BlockDeviceError::InvalidOffset {
                offset,
                size: self.size,
            });
        }

        let bytes_to_read = std::cmp::min(buf.len() as u64, self.size - offset) as usize;

        if let Some(ref mmap) = self.mmap {
            let src = &mmap[offset as usize..offset as usize + bytes_to_read];
            buf[..bytes_to_read].copy_from_slice(src);
            return Ok(bytes_to_read);
        }

        let mut file = self.file.write().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        let n = file.read(&mut buf[..bytes_to_read])?;
        Ok(n)
    }
}

// ImageFile is Send + Sync because all mutable state is behind RwLock
// and the mmap is never written through.
unsafe impl Send for ImageFile {}
unsafe impl Sync for ImageFile {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use std::io::Write as _;

    #[test]
    fn test_open_and_read() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"Hello, pool!").unwrap();
        temp.flush().unwrap();

        let img = ImageFile::open(temp.path(), true).unwrap();
        assert_eq!(img.size(), 12);

        let mut buf = vec![0u8; 5];
        img.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"Hello");
    }

    #[test]
    fn test_read_past_end_is_clamped() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(&[0xAAu8; 16]).unwrap();
        temp.flush().unwrap();

        let img = ImageFile::open(temp.path(), true).unwrap();
        let mut buf = vec![0u8; 32];
        let n = img.read_at(8, &mut buf).unwrap();
        assert_eq!(n, 8);
    }

    #[test]
    fn test_read_at_eof_errors() {
        let temp = NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), vec![0u8; 4]).unwrap();

        let img = ImageFile::open(temp.path(), true).unwrap();
        let mut buf = vec![0u8; 4];
        assert!(img.read_at(4, &mut buf).is_err());
    }
}
