//! Directory entry codec.
//!
//! Layout (32 bytes):
//! - Byte 0: User number (0-15, 0xE5 = free)
//! - Bytes 1-8: Filename (space-padded)
//! - Bytes 9-11: Extension (space-padded, high bits of 9 and 10 are attributes)
//! - Byte 12: Extent number (EX)
//! - Byte 13: Bytes used in the last record (S1, 0 = all 128)
//! - Byte 14: Reserved (S2)
//! - Byte 15: Record count within the extent (RC)
//! - Bytes 16-31: Eight 16-bit block pointers (0 = unused)

use super::name::{Attributes, CpmName};
use super::{DELETED, ENTRY_SIZE, EXTENT_BYTES, POINTERS_PER_ENTRY, RECORD_SIZE};

/// One 32-byte directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    raw: [u8; ENTRY_SIZE],
}

impl DirEntry {
    /// Decode from a 32-byte slice.
    pub fn parse(bytes: &[u8]) -> Self {
        let mut raw = [0u8; ENTRY_SIZE];
        raw.copy_from_slice(&bytes[..ENTRY_SIZE]);
        Self { raw }
    }

    /// Zeroed entry for `name` in `user`'s area.
    pub fn new(user: u8, name: &CpmName, attrs: Attributes) -> Self {
        let mut raw = [0u8; ENTRY_SIZE];
        raw[0] = user;
        raw[1..12].copy_from_slice(&name.to_raw(attrs));
        Self { raw }
    }

    /// Encode into a 32-byte slice.
    pub fn write_to(&self, bytes: &mut [u8]) {
        bytes[..ENTRY_SIZE].copy_from_slice(&self.raw);
    }

    pub fn as_bytes(&self) -> &[u8; ENTRY_SIZE] {
        &self.raw
    }

    /// User number, or 0xE5 for a free slot.
    pub fn user(&self) -> u8 {
        self.raw[0]
    }

    pub fn is_deleted(&self) -> bool {
        self.raw[0] == DELETED
    }

    /// Free the slot, leaving the rest of the entry as it was.
    pub fn mark_deleted(&mut self) {
        self.raw[0] = DELETED;
    }

    /// Raw name bytes including attribute bits.
    pub fn raw_name(&self) -> &[u8] {
        &self.raw[1..12]
    }

    /// Name without attribute bits.
    pub fn name(&self) -> CpmName {
        CpmName::from_raw(self.raw_name()).0
    }

    pub fn attributes(&self) -> Attributes {
        CpmName::from_raw(self.raw_name()).1
    }

    /// True if this live entry belongs to `name` in `user`'s area.
    pub fn matches(&self, user: u8, name: &CpmName) -> bool {
        !self.is_deleted() && self.user() == user && self.name() == *name
    }

    /// Extent number (EX).
    pub fn ex(&self) -> u8 {
        self.raw[12]
    }

    pub fn set_ex(&mut self, v: u8) {
        self.raw[12] = v;
    }

    /// Bytes used in the final record (S1), 0 meaning a full record.
    pub fn last_record_bytes(&self) -> u8 {
        self.raw[13]
    }

    pub fn set_last_record_bytes(&mut self, v: u8) {
        self.raw[13] = v;
    }

    /// Record count (RC).
    pub fn rc(&self) -> u8 {
        self.raw[15]
    }

    pub fn set_rc(&mut self, v: u8) {
        self.raw[15] = v;
    }

    /// Block pointer `i` (0-7).
    pub fn block(&self, i: usize) -> u16 {
        u16::from_le_bytes([self.raw[16 + i * 2], self.raw[17 + i * 2]])
    }

    pub fn set_block(&mut self, i: usize, block: u16) {
        self.raw[16 + i * 2..18 + i * 2].copy_from_slice(&block.to_le_bytes());
    }

    /// Non-zero block pointers in array order.
    pub fn blocks(&self) -> impl Iterator<Item = u16> + '_ {
        (0..POINTERS_PER_ENTRY)
            .map(|i| self.block(i))
            .filter(|&b| b != 0)
    }

    /// File offset just past the last record this entry describes.
    pub fn end_offset(&self) -> u64 {
        self.ex() as u64 * EXTENT_BYTES as u64 + self.rc() as u64 * RECORD_SIZE as u64
    }

    /// File length implied by this entry, honouring a partial last record.
    pub fn byte_len(&self) -> u64 {
        let end = self.end_offset();
        match self.last_record_bytes() {
            n @ 1..=127 if self.rc() > 0 => end - RECORD_SIZE as u64 + n as u64,
            _ => end,
        }
    }
}
