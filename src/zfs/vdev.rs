//! The vdev (virtual device) tree describing a pool's physical layout.
//!
//! Built from the `vdev_tree` nvlist carried in every label: a top-level
//! vdev is a `file`/`disk` leaf, or a `mirror`/`raidz` container of
//! children. Children may be missing (the image wasn't supplied) — each
//! vdev tracks how many of its children are actually available and
//! whether that's enough to serve reads, mirroring `ZFS_VDEV::checkUsable()`.

use super::{NvList, Result, ZfsError};
use std::sync::Arc;

use crate::blockdev::BlockDevice;

/// The kind of a top-level vdev.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VdevKind {
    File,
    Disk,
    Mirror,
    Raidz,
}

impl VdevKind {
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(Self::File),
            "disk" => Ok(Self::Disk),
            "mirror" => Ok(Self::Mirror),
            "raidz" => Ok(Self::Raidz),
            other => Err(ZfsError::UnsupportedRaidz(format!(
                "unsupported vdev type: {}",
                other
            ))),
        }
    }
}

/// One child device of a vdev: a leaf that may or may not have had its
/// backing image supplied.
pub struct VdevChild {
    pub id: u64,
    pub guid: u64,
    pub path: String,
    pub device: Option<Arc<dyn BlockDevice>>,
}

impl VdevChild {
    fn from_nvlist(nv: &NvList) -> Result<Self> {
        Ok(Self {
            id: nv.get_uint64("id").unwrap_or(0),
            guid: nv.get_uint64("guid")?,
            path: nv.get_string("path").unwrap_or("").to_string(),
            device: None,
        })
    }
}

/// A top-level vdev: a leaf device, or a container (mirror/raidz) over
/// several leaf children.
pub struct Vdev {
    pub id: u64,
    pub guid: u64,
    pub kind: VdevKind,
    pub nparity: u8,
    pub children: Vec<VdevChild>,
}

impl Vdev {
    /// Builds a vdev from its `vdev_tree` nvlist, the same fields
    /// `ZFS_VDEV`'s constructor reads: `id`/`guid`/`type`, `nparity` for
    /// raidz, and per-type children.
    pub fn from_nvlist(nv: &NvList) -> Result<Self> {
        let id = nv.get_uint64("id").unwrap_or(0);
        let guid = nv.get_uint64("guid")?;
        let kind = VdevKind::from_str(nv.get_string("type")?)?;
        let nparity = nv.get_uint64("nparity").unwrap_or(0) as u8;

        let children = match kind {
            VdevKind::File | VdevKind::Disk => vec![VdevChild::from_nvlist(nv)?],
            VdevKind::Mirror | VdevKind::Raidz => {
                let child_list = nv.get_nvlist_array("children")?;
                child_list
                    .iter()
                    .map(VdevChild::from_nvlist)
                    .collect::<Result<Vec<_>>>()?
            }
        };

        Ok(Self {
            id,
            guid,
            kind,
            nparity,
            children,
        })
    }

    /// Registers an opened device against whichever child it matches by
    /// guid, mirroring `ZFS_VDEV::addDevice`.
    pub fn attach_device(&mut self, guid: u64, device: Arc<dyn BlockDevice>) -> bool {
        for child in &mut self.children {
            if child.guid == guid {
                child.device = Some(device);
                return true;
            }
        }
        false
    }

    pub fn available_children(&self) -> usize {
        self.children.iter().filter(|c| c.device.is_some()).count()
    }

    /// Whether enough children are present to serve reads: all of them for
    /// a plain file/disk vdev, at least one for a mirror, and all but
    /// `nparity` for raidz.
    pub fn is_usable(&self) -> bool {
        let available = self.available_children();
        match self.kind {
            VdevKind::File | VdevKind::Disk => available == self.children.len(),
            VdevKind::Mirror => available > 0,
            VdevKind::Raidz => available + self.nparity as usize >= self.children.len(),
        }
    }

    pub fn child_device(&self, index: usize) -> Result<&Arc<dyn BlockDevice>> {
        self.children
            .get(index)
            .and_then(|c| c.device.as_ref())
            .ok_or_else(|| ZfsError::DeviceMissing(self.children.get(index).map(|c| c.guid).unwrap_or(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vdev_kind_from_str() {
        assert_eq!(VdevKind::from_str("file").unwrap(), VdevKind::File);
        assert_eq!(VdevKind::from_str("mirror").unwrap(), VdevKind::Mirror);
        assert!(VdevKind::from_str("raidz2").is_err());
    }
}
