//! Occupancy maps for data blocks and directory slots.
//!
//! Neither map is stored on disk. Both are rebuilt by the directory scan at
//! mount time and then kept in step with every allocation and release.

use std::collections::BTreeMap;
use std::fmt;

use crate::dpb::Geometry;
use crate::error::{CpmError, CpmResult};

/// Which map a bitmap tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    Block,
    Directory,
}

impl fmt::Display for MapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKind::Block => write!(f, "block map"),
            MapKind::Directory => write!(f, "directory map"),
        }
    }
}

/// Bit-per-unit occupancy vector. A set bit means the unit is in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    kind: MapKind,
    bits: Vec<u8>,
    len: usize,
    free: usize,
}

impl Bitmap {
    const BITS_PER_CHUNK: usize = u8::BITS as usize;

    /// Create a map of `len` free units.
    pub fn new(kind: MapKind, len: usize) -> Self {
        Self {
            kind,
            bits: vec![0; len.div_ceil(Self::BITS_PER_CHUNK)],
            len,
            free: len,
        }
    }

    pub fn kind(&self) -> MapKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn free_count(&self) -> usize {
        self.free
    }

    pub fn used_count(&self) -> usize {
        self.len - self.free
    }

    /// True if `index` is in range and in use.
    pub fn is_used(&self, index: usize) -> bool {
        index < self.len && self.bits[index / Self::BITS_PER_CHUNK] & Self::mask(index) != 0
    }

    fn mask(index: usize) -> u8 {
        1 << (index % Self::BITS_PER_CHUNK)
    }

    fn check_range(&self, index: usize) -> CpmResult<()> {
        if index >= self.len {
            return Err(CpmError::OutOfRange {
                map: self.kind,
                index,
            });
        }
        Ok(())
    }

    /// Mark a free unit as used.
    pub fn mark_used(&mut self, index: usize) -> CpmResult<()> {
        self.check_range(index)?;
        if self.is_used(index) {
            return Err(CpmError::AlreadyAllocated {
                map: self.kind,
                index,
            });
        }
        self.bits[index / Self::BITS_PER_CHUNK] |= Self::mask(index);
        self.free -= 1;
        Ok(())
    }

    /// Mark a used unit as free. Freeing a free unit is an error.
    pub fn mark_free(&mut self, index: usize) -> CpmResult<()> {
        self.check_range(index)?;
        if !self.is_used(index) {
            return Err(CpmError::DoubleFree {
                map: self.kind,
                index,
            });
        }
        self.bits[index / Self::BITS_PER_CHUNK] &= !Self::mask(index);
        self.free += 1;
        Ok(())
    }

    /// Mark `0..count` used, leaving units already in use as they are.
    fn mark_prefix(&mut self, count: usize) {
        for index in 0..count.min(self.len) {
            if !self.is_used(index) {
                self.bits[index / Self::BITS_PER_CHUNK] |= Self::mask(index);
                self.free -= 1;
            }
        }
    }

    /// First-fit reservation of `count` units at or after `from`.
    ///
    /// Units need not be contiguous. Returns `None` without touching the map
    /// if fewer than `count` units are free.
    pub fn allocate(&mut self, count: usize, from: usize) -> Option<Vec<usize>> {
        if count > self.free {
            return None;
        }
        let picked: Vec<usize> = (from..self.len)
            .filter(|&i| !self.is_used(i))
            .take(count)
            .collect();
        if picked.len() < count {
            return None;
        }
        for &i in &picked {
            self.bits[i / Self::BITS_PER_CHUNK] |= Self::mask(i);
        }
        self.free -= count;
        Some(picked)
    }
}

/// Block and directory maps of one mounted disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationMaps {
    pub blocks: Bitmap,
    pub dirs: Bitmap,
    dir_blocks: usize,
    /// Cross-linked blocks: references beyond the first claim.
    shared: BTreeMap<u16, u32>,
}

impl AllocationMaps {
    /// Fresh maps with the directory region already occupied.
    pub fn new(geometry: &Geometry) -> Self {
        let mut blocks = Bitmap::new(MapKind::Block, geometry.block_count as usize);
        let dir_blocks = geometry.dir_blocks as usize;
        blocks.mark_prefix(dir_blocks);
        Self {
            blocks,
            dirs: Bitmap::new(MapKind::Directory, geometry.dir_entries as usize),
            dir_blocks,
            shared: BTreeMap::new(),
        }
    }

    /// Index of the first block that may hold file data.
    pub fn first_data_block(&self) -> usize {
        self.dir_blocks
    }

    /// Reserve `count` directory slots, lowest first.
    pub fn allocate_directory(&mut self, count: usize) -> CpmResult<Vec<usize>> {
        self.dirs.allocate(count, 0).ok_or(CpmError::DirectoryFull)
    }

    /// Reserve `count` data blocks, lowest first, never inside the directory.
    pub fn allocate_blocks(&mut self, count: usize) -> CpmResult<Vec<u16>> {
        let picked = self
            .blocks
            .allocate(count, self.dir_blocks)
            .ok_or(CpmError::DiskFull)?;
        Ok(picked.into_iter().map(|b| b as u16).collect())
    }

    /// Record a slot found in use by the directory scan.
    pub fn claim_directory(&mut self, slot: usize) -> CpmResult<()> {
        self.dirs.mark_used(slot)
    }

    /// Record a data block found in use by the directory scan.
    pub fn claim_block(&mut self, block: u16) -> CpmResult<()> {
        self.check_data_block(block)?;
        self.blocks.mark_used(block as usize)
    }

    /// Record a block found in use by the directory scan, counting a second
    /// claim as a cross-link instead of failing.
    ///
    /// Returns true if the block was already claimed.
    pub fn claim_shared_block(&mut self, block: u16) -> CpmResult<bool> {
        match self.claim_block(block) {
            Ok(()) => Ok(false),
            Err(CpmError::AlreadyAllocated { .. }) => {
                *self.shared.entry(block).or_insert(0) += 1;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Number of entries referencing `block` beyond the first.
    pub fn shared_refs(&self, block: u16) -> u32 {
        self.shared.get(&block).copied().unwrap_or(0)
    }

    pub fn free_directory(&mut self, slot: usize) -> CpmResult<()> {
        self.dirs.mark_free(slot)
    }

    /// Release a data block. Directory blocks can never be released.
    ///
    /// A cross-linked block only drops one reference and stays in use while
    /// another entry still points at it.
    pub fn free_block(&mut self, block: u16) -> CpmResult<()> {
        self.check_data_block(block)?;
        if let Some(refs) = self.shared.get_mut(&block) {
            *refs -= 1;
            if *refs == 0 {
                self.shared.remove(&block);
            }
            return Ok(());
        }
        self.blocks.mark_free(block as usize)
    }

    /// Release every block in `blocks`, stopping at the first failure.
    pub fn free_blocks(&mut self, blocks: &[u16]) -> CpmResult<()> {
        blocks.iter().try_for_each(|&b| self.free_block(b))
    }

    fn check_data_block(&self, block: u16) -> CpmResult<()> {
        if (block as usize) < self.dir_blocks {
            return Err(CpmError::OutOfRange {
                map: MapKind::Block,
                index: block as usize,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn geometry(blocks: u32, dir_blocks: u32, entries: u32) -> Geometry {
        Geometry {
            start: 0,
            first_sector: 1,
            block_size: 2048,
            block_count: blocks,
            dir_entries: entries,
            dir_blocks,
        }
    }

    #[test]
    fn test_bitmap_basic() {
        let mut map = Bitmap::new(MapKind::Block, 10);
        assert_eq!(map.free_count(), 10);

        map.mark_used(3).unwrap();
        assert!(map.is_used(3));
        assert_eq!(map.allocate(4, 0), Some(vec![0, 1, 2, 4]));
        assert_eq!(map.free_count(), 5);

        map.mark_free(1).unwrap();
        assert_eq!(map.allocate(2, 0), Some(vec![1, 5]));
    }

    #[test]
    fn test_double_free_rejected() {
        let mut map = Bitmap::new(MapKind::Directory, 4);
        map.mark_used(2).unwrap();
        map.mark_free(2).unwrap();
        assert!(matches!(
            map.mark_free(2),
            Err(CpmError::DoubleFree {
                map: MapKind::Directory,
                index: 2
            })
        ));
        assert_eq!(map.free_count(), 4);
    }

    #[test]
    fn test_mark_used_twice_and_range() {
        let mut map = Bitmap::new(MapKind::Block, 4);
        map.mark_used(0).unwrap();
        assert!(matches!(
            map.mark_used(0),
            Err(CpmError::AlreadyAllocated { .. })
        ));
        assert!(matches!(map.mark_used(4), Err(CpmError::OutOfRange { .. })));
        assert!(!map.is_used(100));
    }

    #[test]
    fn test_allocate_all_or_nothing() {
        let mut map = Bitmap::new(MapKind::Block, 8);
        map.allocate(6, 0).unwrap();
        let before = map.clone();
        assert_eq!(map.allocate(3, 0), None);
        assert_eq!(map, before);
    }

    #[test]
    fn test_maps_reserve_directory() {
        let mut maps = AllocationMaps::new(&geometry(20, 2, 64));
        assert!(maps.blocks.is_used(0));
        assert!(maps.blocks.is_used(1));
        assert_eq!(maps.blocks.free_count(), 18);

        assert_eq!(maps.allocate_blocks(3).unwrap(), vec![2, 3, 4]);
        assert_eq!(maps.allocate_directory(2).unwrap(), vec![0, 1]);
        assert!(matches!(maps.free_block(1), Err(CpmError::OutOfRange { .. })));
        assert!(matches!(maps.claim_block(0), Err(CpmError::OutOfRange { .. })));
    }

    #[test]
    fn test_maps_full() {
        let mut maps = AllocationMaps::new(&geometry(6, 2, 4));
        assert!(matches!(maps.allocate_blocks(5), Err(CpmError::DiskFull)));
        assert_eq!(maps.blocks.free_count(), 4);
        assert!(matches!(
            maps.allocate_directory(5),
            Err(CpmError::DirectoryFull)
        ));
        assert_eq!(maps.dirs.free_count(), 4);
    }

    #[test]
    fn test_shared_block_freed_last() {
        let mut maps = AllocationMaps::new(&geometry(20, 2, 64));
        assert!(!maps.claim_shared_block(5).unwrap());
        assert!(maps.claim_shared_block(5).unwrap());
        assert_eq!(maps.shared_refs(5), 1);

        maps.free_block(5).unwrap();
        assert!(maps.blocks.is_used(5));
        assert_eq!(maps.shared_refs(5), 0);

        maps.free_block(5).unwrap();
        assert!(!maps.blocks.is_used(5));
        assert!(matches!(maps.free_block(5), Err(CpmError::DoubleFree { .. })));
        assert!(matches!(
            maps.claim_shared_block(1),
            Err(CpmError::OutOfRange { .. })
        ));
    }

    proptest! {
        #[test]
        fn alloc_then_free_restores(
            blocks in 8..400_u32,
            dir_blocks in 1..8_u32,
            used in prop::collection::vec(0..400_u16, 0..60),
            count in 0..100_usize,
        ) {
            let mut maps = AllocationMaps::new(&geometry(blocks, dir_blocks, 32));
            for block in used {
                if maps.blocks.len() > block as usize {
                    let _ = maps.claim_block(block);
                }
            }
            let before = maps.clone();

            match maps.allocate_blocks(count) {
                Ok(picked) => {
                    prop_assert_eq!(picked.len(), count);
                    prop_assert!(picked.iter().all(|&b| b as u32 >= dir_blocks));
                    maps.free_blocks(&picked).unwrap();
                }
                Err(_) => prop_assert!(count > before.blocks.free_count()),
            }
            prop_assert_eq!(maps, before);
        }
    }
}
