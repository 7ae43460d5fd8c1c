//! Directory entries, file names and extent accounting.
//!
//! The directory is an array of 32-byte entries packed 16 to a sector. A file
//! owns one entry per 8 data blocks; entries of one file share user and name
//! and are told apart by their extent numbers.

mod entry;
mod extent;
mod name;

pub use entry::DirEntry;
pub use extent::{ExtentCounter, ExtentPlan};
pub use name::{Attributes, CpmName};

/// Size of a directory entry.
pub const ENTRY_SIZE: usize = 32;

/// Directory entries per 512-byte sector.
pub const ENTRIES_PER_SECTOR: usize = 16;

/// User byte of a free slot; also the fill byte of a fresh directory.
pub const DELETED: u8 = 0xE5;

/// Block pointers per entry.
pub const POINTERS_PER_ENTRY: usize = 8;

/// Bytes addressed by one logical extent.
pub const EXTENT_BYTES: u32 = 16384;

/// Size of a logical record.
pub const RECORD_SIZE: u32 = 128;

/// Highest user area.
pub const MAX_USER: u8 = 15;

/// Largest file whose extent number fits the entry's extent byte.
pub const MAX_FILE_SIZE: usize = 256 * EXTENT_BYTES as usize;
