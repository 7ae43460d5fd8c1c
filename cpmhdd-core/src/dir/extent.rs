//! Extent accounting for file writes.

use super::{EXTENT_BYTES, MAX_FILE_SIZE, POINTERS_PER_ENTRY, RECORD_SIZE};
use crate::error::{CpmError, CpmResult};

/// Blocks and directory entries a file of a given size needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentPlan {
    pub blocks: usize,
    pub entries: usize,
}

impl ExtentPlan {
    /// Plan a file of `size` bytes. An empty file still gets one entry.
    pub fn for_size(size: usize, block_size: u32) -> CpmResult<Self> {
        if size > MAX_FILE_SIZE {
            return Err(CpmError::FileTooLarge(size));
        }
        let blocks = size.div_ceil(block_size as usize);
        Ok(Self {
            blocks,
            entries: blocks.div_ceil(POINTERS_PER_ENTRY).max(1),
        })
    }
}

/// Running extent number and record count while data is written.
///
/// Bytes are added as each block is written. Whenever the running total
/// passes one extent it wraps and the extent number advances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtentCounter {
    extent: u8,
    total: u32,
}

impl ExtentCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for `bytes` more data.
    pub fn advance(&mut self, bytes: u32) {
        self.total += bytes;
        while self.total > EXTENT_BYTES {
            self.total -= EXTENT_BYTES;
            self.extent = self.extent.wrapping_add(1);
        }
    }

    /// Extent number (EX) for the entry being filled.
    pub fn extent(&self) -> u8 {
        self.extent
    }

    /// Record count (RC) for the entry being filled.
    pub fn record_count(&self) -> u8 {
        self.total.div_ceil(RECORD_SIZE) as u8
    }
}
