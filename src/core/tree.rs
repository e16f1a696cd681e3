//! BTRFS B-tree implementation
//!
//! BTRFS uses copy-on-write B-trees for all on-disk data structures.
//! All parsing functions are optimized with inline hints for hot paths.

use super::{checksum, BtrfsError, BtrfsFilesystem, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Size of a node header
pub const NODE_HEADER_SIZE: usize = 0x65;

/// Size of a key pointer in internal nodes
pub const KEY_PTR_SIZE: usize = 0x21;

/// Size of an item header in leaf nodes
pub const ITEM_SIZE: usize = 0x19;

/// Size of a key structure
pub const KEY_SIZE: usize = 0x11;

/// Tree types in BTRFS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeType {
    Root,
    Extent,
    Chunk,
    Dev,
    Fs,
    Csum,
    Quota,
    Uuid,
    FreeSpace,
    BlockGroup,
    Unknown(u64),
}

impl TreeType {
    /// Creates a TreeType from an object ID
    #[inline]
    pub const fn from_objectid(objectid: u64) -> Self {
        match objectid {
            1 => Self::Root,
            2 => Self::Extent,
            3 => Self::Chunk,
            4 => Self::Dev,
            5 => Self::Fs,
            7 => Self::Csum,
            8 => Self::Quota,
            9 => Self::Uuid,
            10 => Self::FreeSpace,
            _ => Self::Unknown(objectid),
        }
    }
}

/// A BTRFS key used for B-tree lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct BtrfsKey {
    /// Object ID
    pub objectid: u64,
    /// Item type
    pub item_type: u8,
    /// Offset (meaning depends on item type)
    pub offset: u64,
}

impl BtrfsKey {
    /// Creates a new key
    #[inline]
    pub const fn new(objectid: u64, item_type: u8, offset: u64) -> Self {
        Self {
            objectid,
            item_type,
            offset,
        }
    }

    /// Parses a key from bytes - hot path, optimized
    #[inline]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < KEY_SIZE {
            return Err(BtrfsError::Corrupt("Key data too small".to_string()));
        }

        Ok(Self {
            objectid: LittleEndian::read_u64(&data[0..8]),
            item_type: data[8],
            offset: LittleEndian::read_u64(&data[9..17]),
        })
    }

    /// Parses a key from bytes without bounds checking (caller must ensure data is valid)
    /// 
    /// # Safety
    /// Caller must ensure `data.len() >= KEY_SIZE` (17 bytes)
    #[inline]
    pub unsafe fn from_bytes_unchecked(data: &[u8]) -> Self {
        Self {
            objectid: LittleEndian::read_u64(data.get_unchecked(0..8)),
            item_type: *data.get_unchecked(8),
            offset: LittleEndian::read_u64(data.get_unchecked(9..17)),
        }
    }

    /// Returns the minimum possible key
    #[inline]
    pub const fn min() -> Self {
        Self::new(0, 0, 0)
    }

    /// Returns the maximum possible key
    #[inline]
    pub const fn max() -> Self {
        Self::new(u64::MAX, u8::MAX, u64::MAX)
    }
}

/// Node header structure
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct NodeHeader {
    /// Checksum
    pub csum: [u8; 32],
    /// Filesystem UUID
    pub fsid: [u8; 16],
    /// Logical address of this node
    pub bytenr: u64,
    /// Flags
    pub flags: [u8; 7],
    /// Backref revision
    pub backref_rev: u8,
    /// Chunk tree UUID
    pub chunk_tree_uuid: [u8; 16],
    /// Generation
    pub generation: u64,
    /// Owner tree ID
    pub owner: u64,
    /// Number of items
    pub nritems: u32,
    /// Level (0 for leaf)
    pub level: u8,
}

impl NodeHeader {
    /// Parses a node header from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < NODE_HEADER_SIZE {
            return Err(BtrfsError::Corrupt("Node header too small".to_string()));
        }

        Self::read_from_bytes(&data[..NODE_HEADER_SIZE])
            .map(|h| h.clone())
            .map_err(|_| BtrfsError::Corrupt("Failed to parse node header".to_string()))
    }

    /// Returns true if this is a leaf node
    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }
}

/// Key pointer in internal nodes
#[derive(Debug, Clone, Copy)]
pub struct KeyPtr {
    /// Key
    pub key: BtrfsKey,
    /// Block number (logical address)
    pub blockptr: u64,
    /// Generation
    pub generation: u64,
}

impl KeyPtr {
    /// Parses a key pointer from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < KEY_PTR_SIZE {
            return Err(BtrfsError::Corrupt("Key pointer too small".to_string()));
        }

        Ok(Self {
            key: BtrfsKey::from_bytes(&data[0..KEY_SIZE])?,
            blockptr: LittleEndian::read_u64(&data[KEY_SIZE..KEY_SIZE + 8]),
            generation: LittleEndian::read_u64(&data[KEY_SIZE + 8..KEY_SIZE + 16]),
        })
    }
}

/// Item in leaf nodes
#[derive(Debug, Clone, Copy)]
pub struct Item {
    /// Key
    pub key: BtrfsKey,
    /// Data offset relative to end of header
    pub offset: u32,
    /// Data size
    pub size: u32,
}

impl Item {
    /// Parses an item from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < ITEM_SIZE {
            return Err(BtrfsError::Corrupt("Item too small".to_string()));
        }

        Ok(Self {
            key: BtrfsKey::from_bytes(&data[0..KEY_SIZE])?,
            offset: LittleEndian::read_u32(&data[KEY_SIZE..KEY_SIZE + 4]),
            size: LittleEndian::read_u32(&data[KEY_SIZE + 4..KEY_SIZE + 8]),
        })
    }
}

/// A parsed BTRFS tree node
#[derive(Debug)]
pub struct TreeNode {
    /// Node header
    pub header: NodeHeader,
    /// Raw node data
    data: Vec<u8>,
}

impl TreeNode {
    /// Parses a tree node from raw data
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        // Verify checksum
        checksum::verify_node_checksum(&data)?;

        let header = NodeHeader::from_bytes(&data)?;

        Ok(Self { header, data })
    }

    /// Returns true if this is a leaf node
    pub fn is_leaf(&self) -> bool {
        self.header.is_leaf()
    }

    /// Returns the number of items in this node
    pub fn num_items(&self) -> u32 {
        self.header.nritems
    }

    /// Returns key pointers for internal nodes
    pub fn key_ptrs(&self) -> Result<Vec<KeyPtr>> {
        if self.is_leaf() {
            return Err(BtrfsError::Corrupt(
                "Cannot get key pointers from leaf node".to_string(),
            ));
        }

        let mut ptrs = Vec::with_capacity(self.header.nritems as usize);
        let mut offset = NODE_HEADER_SIZE;

        for _ in 0..self.header.nritems {
            let ptr = KeyPtr::from_bytes(&self.data[offset..])?;
            ptrs.push(ptr);
            offset += KEY_PTR_SIZE;
        }

        Ok(ptrs)
    }

    /// Returns items for leaf nodes
    pub fn items(&self) -> Result<Vec<Item>> {
        if !self.is_leaf() {
            return Err(BtrfsError::Corrupt(
                "Cannot get items from internal node".to_string(),
            ));
        }

        let mut items = Vec::with_capacity(self.header.nritems as usize);
        let mut offset = NODE_HEADER_SIZE;

        for _ in 0..self.header.nritems {
            let item = Item::from_bytes(&self.data[offset..])?;
            items.push(item);
            offset += ITEM_SIZE;
        }

        Ok(items)
    }

    /// Gets item data for a leaf node item
    pub fn item_data(&self, item: &Item) -> &[u8] {
        let start = NODE_HEADER_SIZE + item.offset as usize;
        let end = start + item.size as usize;
        &self.data[start..end]
    }

    /// Gets the raw node data
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A BTRFS tree for traversal and lookups
pub struct BtrfsTree<'a> {
    fs: &'a BtrfsFilesystem,
    root_logical: u64,
    root_level: u8,
    /// Child nodes memoized by the key-pointer (logical address) that names
    /// them, per §4.8: a node has exactly one parent pointer, so a second
    /// traversal through this tree instance never re-reads it from disk.
    cache: RefCell<HashMap<u64, Rc<TreeNode>>>,
}

impl<'a> BtrfsTree<'a> {
    /// Creates a new tree from a root address
    pub fn new(fs: &'a BtrfsFilesystem, root_logical: u64, root_level: u8) -> Self {
        Self {
            fs,
            root_logical,
            root_level,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Reads a node at the given logical address, materializing it from the
    /// device only on first visit.
    pub fn read_node(&self, logical: u64) -> Result<Rc<TreeNode>> {
        if let Some(node) = self.cache.borrow().get(&logical) {
            return Ok(node.clone());
        }
        let data = self.fs.read_node(logical)?;
        let node = Rc::new(TreeNode::parse(data)?);
        self.cache.borrow_mut().insert(logical, node.clone());
        Ok(node)
    }

    /// Searches for a key in the tree
    pub fn search(&self, key: &BtrfsKey) -> Result<Option<(Item, Vec<u8>)>> {
        self.search_from(self.root_logical, key)
    }

    /// Searches for a key starting from a given node
    fn search_from(&self, logical: u64, key: &BtrfsKey) -> Result<Option<(Item, Vec<u8>)>> {
        let node = self.read_node(logical)?;

        if node.is_leaf() {
            // Search in leaf node
            let items = node.items()?;
            for item in items {
                if item.key == *key {
                    let data = node.item_data(&item).to_vec();
                    return Ok(Some((item, data)));
                }
            }
            Ok(None)
        } else {
            // Search in internal node
            let ptrs = node.key_ptrs()?;

            // Find the child to descend into
            let mut child_ptr = ptrs[0].blockptr;
            for ptr in &ptrs {
                if ptr.key > *key {
                    break;
                }
                child_ptr = ptr.blockptr;
            }

            self.search_from(child_ptr, key)
        }
    }

    /// Searches for items in a range
    pub fn search_range(
        &self,
        min_key: &BtrfsKey,
        max_key: &BtrfsKey,
    ) -> Result<Vec<(Item, Vec<u8>)>> {
        let mut results = Vec::new();
        self.search_range_from(self.root_logical, min_key, max_key, &mut results)?;
        Ok(results)
    }

    /// Searches for items in a range starting from a given node
    fn search_range_from(
        &self,
        logical: u64,
        min_key: &BtrfsKey,
        max_key: &BtrfsKey,
        results: &mut Vec<(Item, Vec<u8>)>,
    ) -> Result<()> {
        let node = self.read_node(logical)?;

        if node.is_leaf() {
            let items = node.items()?;
            for item in items {
                if item.key >= *min_key && item.key <= *max_key {
                    let data = node.item_data(&item).to_vec();
                    results.push((item, data));
                }
            }
        } else {
            let ptrs = node.key_ptrs()?;
            for ptr in ptrs {
                // Check if this subtree might contain items in range
                if ptr.key <= *max_key {
                    self.search_range_from(ptr.blockptr, min_key, max_key, results)?;
                }
            }
        }

        Ok(())
    }

    /// Iterates over all items in the tree
    pub fn iter(&'a self) -> TreeIterator<'a> {
        TreeIterator::new(self)
    }
}

/// Iterator over tree items
pub struct TreeIterator<'a> {
    tree: &'a BtrfsTree<'a>,
    stack: Vec<(Rc<TreeNode>, usize)>,
    initialized: bool,
}

impl<'a> TreeIterator<'a> {
    fn new(tree: &'a BtrfsTree<'a>) -> Self {
        Self {
            tree,
            stack: Vec::new(),
            initialized: false,
        }
    }

    fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let node = self.tree.read_node(self.tree.root_logical)?;
        self.stack.push((node, 0));
        self.initialized = true;
        Ok(())
    }
}

impl<'a> Iterator for TreeIterator<'a> {
    type Item = Result<(Item, Vec<u8>)>;

    /// Depth-first full traverse: every internal-node frame re-enters this
    /// loop once per child, descending before returning to its own
    /// siblings, so every leaf in the tree is eventually visited — not
    /// just the leftmost one.
    fn next(&mut self) -> Option<Self::Item> {
        if let Err(e) = self.initialize() {
            return Some(Err(e));
        }

        loop {
            let (node, idx) = self.stack.last_mut()?;

            if node.is_leaf() {
                let items = match node.items() {
                    Ok(items) => items,
                    Err(e) => return Some(Err(e)),
                };

                if *idx < items.len() {
                    let item = items[*idx];
                    let data = node.item_data(&item).to_vec();
                    *idx += 1;
                    return Some(Ok((item, data)));
                } else {
                    self.stack.pop();
                    continue;
                }
            }

            let ptrs = match node.key_ptrs() {
                Ok(ptrs) => ptrs,
                Err(e) => return Some(Err(e)),
            };

            if *idx < ptrs.len() {
                let child_logical = ptrs[*idx].blockptr;
                *idx += 1;
                match self.tree.read_node(child_logical) {
                    Ok(child) => self.stack.push((child, 0)),
                    Err(e) => return Some(Err(e)),
                }
            } else {
                self.stack.pop();
            }
        }
    }
}
