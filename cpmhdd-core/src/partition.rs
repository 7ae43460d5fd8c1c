//! Partition table walker.
//!
//! CP/M disks live as logical partitions inside DOS extended partitions.
//! The primary table (sector 0) may hold container partitions; each
//! container starts a chain of secondary tables (SMBRs). Every SMBR holds one
//! logical partition in its first record and a link to the next SMBR in its
//! second record.
//!
//! Layout of a table sector:
//! - Bytes 0x000-0x1BD: boot code (ignored)
//! - Bytes 0x1BE-0x1FD: four 16-byte partition records
//! - Bytes 0x1FE-0x1FF: boot signature 0x55 0xAA

use std::collections::HashSet;

use log::{debug, warn};

use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::error::{CpmError, CpmResult};

/// Offset of the first partition record in a table sector.
pub const TABLE_OFFSET: usize = 0x1BE;

/// Size of one partition record.
pub const RECORD_SIZE: usize = 16;

/// Partition type of a CP/M logical disk.
pub const CPM_KIND: u8 = 0x02;

/// Partition types that hold a chain of secondary tables.
pub const CONTAINER_KINDS: [u8; 3] = [0x05, 0x0C, 0x0F];

/// DOS partition types a logical CP/M disk may be created from.
pub const DOS_KINDS: [u8; 6] = [0x01, 0x04, 0x06, 0x0B, 0x0E, 0x83];

/// Upper bound on links followed in one chain.
pub const MAX_CHAIN_LINKS: usize = 256;

/// True if the sector ends with the 0x55 0xAA boot signature.
pub fn has_boot_signature(sector: &[u8; SECTOR_SIZE]) -> bool {
    sector[0x1FE] == 0x55 && sector[0x1FF] == 0xAA
}

/// Stamp the boot signature into a sector.
pub fn set_boot_signature(sector: &mut [u8; SECTOR_SIZE]) {
    sector[0x1FE] = 0x55;
    sector[0x1FF] = 0xAA;
}

/// One 16-byte record of a partition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionRecord {
    /// 0x80 marks a bootable partition.
    pub active: u8,
    pub start_head: u8,
    pub start_cyl_sec: u16,
    pub kind: u8,
    pub end_head: u8,
    pub end_cyl_sec: u16,
    /// Start sector relative to the table's base.
    pub relative_start: u32,
    /// Size in sectors.
    pub size: u32,
}

impl PartitionRecord {
    /// Decode record `index` (0-3) of a table sector.
    pub fn parse(sector: &[u8; SECTOR_SIZE], index: usize) -> Self {
        let b = &sector[TABLE_OFFSET + index * RECORD_SIZE..][..RECORD_SIZE];
        Self {
            active: b[0],
            start_head: b[1],
            start_cyl_sec: u16::from_le_bytes([b[2], b[3]]),
            kind: b[4],
            end_head: b[5],
            end_cyl_sec: u16::from_le_bytes([b[6], b[7]]),
            relative_start: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            size: u32::from_le_bytes([b[12], b[13], b[14], b[15]]),
        }
    }

    /// Encode into record `index` (0-3) of a table sector.
    pub fn write_to(&self, sector: &mut [u8; SECTOR_SIZE], index: usize) {
        let b = &mut sector[TABLE_OFFSET + index * RECORD_SIZE..][..RECORD_SIZE];
        b[0] = self.active;
        b[1] = self.start_head;
        b[2..4].copy_from_slice(&self.start_cyl_sec.to_le_bytes());
        b[4] = self.kind;
        b[5] = self.end_head;
        b[6..8].copy_from_slice(&self.end_cyl_sec.to_le_bytes());
        b[8..12].copy_from_slice(&self.relative_start.to_le_bytes());
        b[12..16].copy_from_slice(&self.size.to_le_bytes());
    }

    pub fn is_container(&self) -> bool {
        CONTAINER_KINDS.contains(&self.kind)
    }
}

/// A logical partition found in an SMBR chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalPartition {
    pub kind: u8,
    /// Absolute start sector.
    pub start: u64,
    /// Size in sectors.
    pub size: u64,
    /// Absolute sector of the SMBR describing this partition.
    pub table_sector: u64,
}

impl LogicalPartition {
    pub fn is_cpm(&self) -> bool {
        self.kind == CPM_KIND
    }

    pub fn is_dos(&self) -> bool {
        DOS_KINDS.contains(&self.kind)
    }

    /// Size in bytes.
    pub fn byte_len(&self) -> u64 {
        self.size * SECTOR_SIZE as u64
    }
}

/// Enumerate every logical partition on the device, in discovery order.
///
/// The primary table must be readable and signed; problems further down a
/// chain are logged and only cut that chain short.
pub fn walk(dev: &mut dyn BlockDevice) -> CpmResult<Vec<LogicalPartition>> {
    let mbr = dev.read(0)?;
    if !has_boot_signature(&mbr) {
        return Err(CpmError::CorruptChain(0));
    }

    let mut found = Vec::new();
    for index in 0..4 {
        let record = PartitionRecord::parse(&mbr, index);
        if record.active != 0 {
            debug!("skip active primary partition {}", index);
            continue;
        }
        if record.is_container() {
            found.extend(walk_chain(dev, record.relative_start as u64));
        }
    }
    Ok(found)
}

/// Follow one SMBR chain starting at absolute sector `base`.
///
/// The first record of each link is relative to that link's own sector; the
/// second record points to the next link relative to `base`.
pub fn walk_chain(dev: &mut dyn BlockDevice, base: u64) -> Vec<LogicalPartition> {
    let mut found = Vec::new();
    let mut visited = HashSet::new();
    let mut current = base;

    loop {
        if !visited.insert(current) {
            warn!("partition chain at {:#X} loops back to {:#X}", base, current);
            break;
        }
        if visited.len() > MAX_CHAIN_LINKS {
            warn!("partition chain at {:#X} exceeds {} links", base, MAX_CHAIN_LINKS);
            break;
        }

        let table = match dev.read(current) {
            Ok(table) => table,
            Err(e) => {
                warn!("can't read SMBR (base {:#X}): {}", base, e);
                break;
            }
        };
        if !has_boot_signature(&table) {
            warn!("{}", CpmError::CorruptChain(current));
            break;
        }

        let part = PartitionRecord::parse(&table, 0);
        let next = PartitionRecord::parse(&table, 1);
        if part.kind != 0 {
            found.push(LogicalPartition {
                kind: part.kind,
                start: current + part.relative_start as u64,
                size: part.size as u64,
                table_sector: current,
            });
        }

        if next.kind == 0 {
            break;
        }
        current = base + next.relative_start as u64;
    }
    found
}

/// Rewrite the type byte of a logical partition's SMBR record.
pub fn set_partition_kind(
    dev: &mut dyn BlockDevice,
    part: &LogicalPartition,
    kind: u8,
) -> CpmResult<()> {
    let mut table = dev.read(part.table_sector)?;
    if !has_boot_signature(&table) {
        return Err(CpmError::CorruptChain(part.table_sector));
    }
    let mut record = PartitionRecord::parse(&table, 0);
    record.kind = kind;
    record.write_to(&mut table, 0);
    dev.write(part.table_sector, &table)
}

/// DOS FAT type matching a partition of `bytes` bytes.
pub fn dos_kind_for_size(bytes: u64) -> u8 {
    const MB: u64 = 1024 * 1024;
    let mut kind = 0x01;
    if bytes > 15 * MB {
        kind += 3;
        if bytes > 32 * MB {
            kind += 2;
        }
    }
    kind
}
