//! CP/M Hard-Disk Filesystem Core
//!
//! This crate reads and writes CP/M 2.2 filesystems stored as logical
//! partitions inside DOS extended partitions, on raw disks or image files:
//! - Partition chain walking (MBR and SMBR links)
//! - Disk parameter block parsing, synthesis and formatting
//! - Block and directory allocation maps rebuilt from the directory
//! - Extent-based file read, write, delete and rename
//! - A catalog tree of devices, disks, user areas and files
//!
//! # Architecture
//!
//! The engine is layered:
//! - `BlockDevice` trait: 512-byte sector I/O
//! - `partition::walk`: finds logical partitions
//! - `LogicalDisk`: one mounted CP/M partition with its maps
//! - `Catalog`: path-based view over every mounted device

pub mod archive;
pub mod bitmap;
pub mod catalog;
pub mod config;
pub mod device;
pub mod dir;
pub mod disk;
pub mod dpb;
pub mod error;
pub mod partition;

pub use archive::{is_archive, load_archive, load_archive_from_path, ArchiveFile};
pub use bitmap::{AllocationMaps, Bitmap, MapKind};
pub use catalog::{
    scan_device, Catalog, EntryKind, NodeId, NodeInfo, NodeKind, PutMode, ScannedDevice, Transfer,
};
pub use config::Settings;
pub use device::{BlockDevice, ImageDevice, MemoryDevice, SECTOR_SIZE};
pub use dir::{Attributes, CpmName, DirEntry};
pub use disk::{FileInfo, LogicalDisk};
pub use dpb::{
    format, synthesize, BlockSizing, DiskParameterBlock, DiskSummary, FormatParams, Geometry,
};
pub use error::{CpmError, CpmResult};
pub use partition::{walk, LogicalPartition, PartitionRecord};
