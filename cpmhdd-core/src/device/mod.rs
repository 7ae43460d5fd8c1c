//! Sector-level storage for the disk engine.
//!
//! This module provides the layer everything else reads and writes through:
//! - `BlockDevice`: indexed 512-byte sector I/O
//! - `MemoryDevice`: in-memory image
//! - `ImageDevice`: flat image file or raw device node

mod block_device;
mod image_device;
mod memory_device;

pub use block_device::{BlockDevice, SECTOR_SIZE};
pub use image_device::ImageDevice;
pub use memory_device::MemoryDevice;
