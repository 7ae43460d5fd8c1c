//! Disk parameter block (DPB) and super sector codec.
//!
//! The first sector of a CP/M partition is the super sector:
//! - Bytes 0-7: signature `"CP/M    "`
//! - Bytes 8-23: DPB (16 bytes, little-endian words)
//! - Bytes 24-509: reserved
//! - Bytes 510-511: boot signature 0x55 0xAA
//!
//! DPB layout:
//! - SPT (u16): 128-byte records per track
//! - BSH, BLM, EXM (u8): block shift, block mask, extent mask
//! - DSM (u16): block count - 1
//! - DRM (u16): directory entries - 1
//! - AL0, AL1 (u8): directory allocation vector
//! - CKS (u16): checksum vector size
//! - OFF (u16): reserved tracks
//! - 1 pad byte
//!
//! Reserved tracks follow the super sector; the data area (block 0) follows
//! them, and the directory occupies the first blocks of the data area.

use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::dir::{DELETED, ENTRIES_PER_SECTOR, ENTRY_SIZE};
use crate::error::{CpmError, CpmResult};
use crate::partition::{has_boot_signature, set_boot_signature};

/// Text signature at the start of the super sector.
pub const SIGNATURE: &[u8; 8] = b"CP/M    ";

/// Encoded size of a DPB.
pub const DPB_SIZE: usize = 16;

/// Records per track used for every synthesized disk.
pub const RECORDS_PER_TRACK: u16 = 128;

/// Allocation-vector budget shared by all mounted disks of a system.
pub const MAX_SYSTEM_ALV: u32 = 2000;

/// Highest block count addressable by 16-bit block pointers.
pub const MAX_BLOCKS: u32 = 0x10000;

const RECORD: u64 = 128;

/// Disk parameter block as stored in the super sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskParameterBlock {
    pub spt: u16,
    pub bsh: u8,
    pub blm: u8,
    pub exm: u8,
    pub dsm: u16,
    pub drm: u16,
    pub al0: u8,
    pub al1: u8,
    pub cks: u16,
    pub off: u16,
}

impl DiskParameterBlock {
    /// Decode from 16 bytes.
    pub fn parse(b: &[u8]) -> Self {
        Self {
            spt: u16::from_le_bytes([b[0], b[1]]),
            bsh: b[2],
            blm: b[3],
            exm: b[4],
            dsm: u16::from_le_bytes([b[5], b[6]]),
            drm: u16::from_le_bytes([b[7], b[8]]),
            al0: b[9],
            al1: b[10],
            cks: u16::from_le_bytes([b[11], b[12]]),
            off: u16::from_le_bytes([b[13], b[14]]),
        }
    }

    /// Encode into 16 bytes. The pad byte is zeroed.
    pub fn write_to(&self, b: &mut [u8]) {
        b[0..2].copy_from_slice(&self.spt.to_le_bytes());
        b[2] = self.bsh;
        b[3] = self.blm;
        b[4] = self.exm;
        b[5..7].copy_from_slice(&self.dsm.to_le_bytes());
        b[7..9].copy_from_slice(&self.drm.to_le_bytes());
        b[9] = self.al0;
        b[10] = self.al1;
        b[11..13].copy_from_slice(&self.cks.to_le_bytes());
        b[13..15].copy_from_slice(&self.off.to_le_bytes());
        b[15] = 0;
    }

    /// Decode the super sector; `NotCpm` if either signature is missing.
    pub fn from_super_sector(sector: &[u8; SECTOR_SIZE], start: u64) -> CpmResult<Self> {
        if !has_boot_signature(sector) || &sector[..8] != SIGNATURE {
            return Err(CpmError::NotCpm(start));
        }
        Ok(Self::parse(&sector[8..8 + DPB_SIZE]))
    }

    /// Build a super sector carrying this DPB.
    pub fn to_super_sector(&self) -> [u8; SECTOR_SIZE] {
        let mut sector = [0u8; SECTOR_SIZE];
        sector[..8].copy_from_slice(SIGNATURE);
        self.write_to(&mut sector[8..8 + DPB_SIZE]);
        set_boot_signature(&mut sector);
        sector
    }

    pub fn block_size(&self) -> u32 {
        (self.blm as u32 + 1) * RECORD as u32
    }

    pub fn block_count(&self) -> u32 {
        self.dsm as u32 + 1
    }

    pub fn dir_entries(&self) -> u32 {
        self.drm as u32 + 1
    }

    /// Directory size in whole blocks.
    pub fn dir_blocks(&self) -> u32 {
        (self.dir_entries() * ENTRY_SIZE as u32).div_ceil(self.block_size())
    }

    /// Bytes of allocation vector a CP/M BIOS reserves for this disk.
    pub fn alv_bytes(&self) -> u32 {
        self.block_count().div_ceil(8)
    }

    /// 512-byte sectors occupied by the reserved tracks.
    pub fn reserved_sectors(&self) -> u64 {
        self.off as u64 * self.spt as u64 * RECORD / SECTOR_SIZE as u64
    }
}

/// Read and decode the super sector at `start`.
pub fn read_super_sector(dev: &mut dyn BlockDevice, start: u64) -> CpmResult<DiskParameterBlock> {
    let sector = dev.read(start)?;
    DiskParameterBlock::from_super_sector(&sector, start)
}

/// Directory blocks needed for one directory entry per 8 data blocks.
pub fn needed_dir_blocks(block_count: u32, block_size: u32) -> u32 {
    (block_count.div_ceil(8) * ENTRY_SIZE as u32).div_ceil(block_size)
}

/// Geometry derived from a DPB and the partition's start sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Absolute sector of the super sector.
    pub start: u64,
    /// Absolute sector of block 0.
    pub first_sector: u64,
    pub block_size: u32,
    pub block_count: u32,
    pub dir_entries: u32,
    pub dir_blocks: u32,
}

impl Geometry {
    /// Derive and sanity-check the geometry of a mounted disk.
    pub fn from_dpb(start: u64, dpb: &DiskParameterBlock) -> CpmResult<Self> {
        let block_size = dpb.block_size();
        if !block_size.is_power_of_two() || !(1024..=16384).contains(&block_size) {
            return Err(CpmError::InvalidGeometry(format!(
                "block size {block_size}"
            )));
        }
        let geometry = Self {
            start,
            first_sector: start + 1 + dpb.reserved_sectors(),
            block_size,
            block_count: dpb.block_count(),
            dir_entries: dpb.dir_entries(),
            dir_blocks: dpb.dir_blocks(),
        };
        if geometry.dir_blocks >= geometry.block_count {
            return Err(CpmError::InvalidGeometry(format!(
                "{} directory blocks on a {}-block disk",
                geometry.dir_blocks, geometry.block_count
            )));
        }
        Ok(geometry)
    }

    pub fn sectors_per_block(&self) -> u64 {
        self.block_size as u64 / SECTOR_SIZE as u64
    }

    /// Absolute sector of the first sector of `block`.
    pub fn block_sector(&self, block: u16) -> u64 {
        self.first_sector + block as u64 * self.sectors_per_block()
    }

    /// Number of sectors holding directory entries.
    pub fn dir_sectors(&self) -> u64 {
        (self.dir_entries as u64).div_ceil(ENTRIES_PER_SECTOR as u64)
    }

    /// Absolute sector holding directory slot `slot`.
    pub fn dir_sector(&self, slot: usize) -> u64 {
        self.first_sector + (slot / ENTRIES_PER_SECTOR) as u64
    }

    /// True for a block pointer that may reference file data.
    pub fn is_data_block(&self, block: u16) -> bool {
        (block as u32) >= self.dir_blocks && (block as u32) < self.block_count
    }

    /// One past the last sector used by the disk.
    pub fn end_sector(&self) -> u64 {
        self.first_sector + self.block_count as u64 * self.sectors_per_block()
    }
}

/// How the block size of a new disk is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockSizing {
    /// Use exactly this block size.
    Fixed(u32),
    /// Smallest block size (from 2048) keeping the allocation vector near this many bytes.
    AllocVector(u32),
}

/// Parameters for formatting a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormatParams {
    pub sizing: BlockSizing,
    pub dir_blocks: u32,
    pub reserved_tracks: u32,
    /// Fill the whole data area, not just the directory.
    pub full_clear: bool,
}

impl Default for FormatParams {
    fn default() -> Self {
        Self {
            sizing: BlockSizing::AllocVector(170),
            dir_blocks: 2,
            reserved_tracks: 2,
            full_clear: false,
        }
    }
}

impl FormatParams {
    pub fn validate(&self) -> CpmResult<()> {
        match self.sizing {
            BlockSizing::Fixed(size) => {
                if !size.is_power_of_two() || !(1024..=16384).contains(&size) {
                    return Err(CpmError::InvalidGeometry(format!(
                        "block size {size} is not a power of two in 1024..=16384"
                    )));
                }
            }
            BlockSizing::AllocVector(alv) => {
                if !(128..=512).contains(&alv) {
                    return Err(CpmError::InvalidGeometry(format!(
                        "allocation vector size {alv} outside 128..=512"
                    )));
                }
            }
        }
        if !(1..=16).contains(&self.dir_blocks) {
            return Err(CpmError::InvalidGeometry(format!(
                "{} directory blocks outside 1..=16",
                self.dir_blocks
            )));
        }
        if self.reserved_tracks > 9 {
            return Err(CpmError::InvalidGeometry(format!(
                "{} reserved tracks outside 0..=9",
                self.reserved_tracks
            )));
        }
        Ok(())
    }
}

/// Smallest block size from 2048 up whose allocation vector stays near `alv` bytes.
pub fn block_size_for(disk_bytes: u64, alv: u32) -> u32 {
    let target = disk_bytes / ((alv as u64 - 1) * 8);
    let mut size = 2048u32;
    while (size as u64) < target && size < 16384 {
        size <<= 1;
    }
    size
}

/// Build a DPB for a partition of `total_sectors` sectors.
///
/// The directory block count is corrected once if it is too small to give
/// one directory entry per 8 blocks.
pub fn synthesize(total_sectors: u64, params: &FormatParams) -> CpmResult<DiskParameterBlock> {
    params.validate()?;
    let block_size = match params.sizing {
        BlockSizing::Fixed(size) => size,
        BlockSizing::AllocVector(alv) => block_size_for(total_sectors * SECTOR_SIZE as u64, alv),
    };

    let dpb = build_dpb(total_sectors, block_size, params.reserved_tracks, params.dir_blocks)?;
    let needed = needed_dir_blocks(dpb.block_count(), block_size);
    if needed <= params.dir_blocks {
        return Ok(dpb);
    }

    debug!(
        "directory raised from {} to {} blocks",
        params.dir_blocks, needed
    );
    if needed > 16 {
        return Err(CpmError::InvalidGeometry(format!(
            "directory needs {needed} blocks of {block_size} bytes, at most 16 fit"
        )));
    }
    build_dpb(total_sectors, block_size, params.reserved_tracks, needed)
}

fn build_dpb(
    total_sectors: u64,
    block_size: u32,
    reserved_tracks: u32,
    dir_blocks: u32,
) -> CpmResult<DiskParameterBlock> {
    let records = total_sectors.saturating_sub(1) * (SECTOR_SIZE as u64 / RECORD);
    let reserved = reserved_tracks as u64 * RECORDS_PER_TRACK as u64;
    let records_per_block = block_size as u64 / RECORD;

    let mut blocks = records.saturating_sub(reserved) / records_per_block;
    if blocks > MAX_BLOCKS as u64 {
        warn!(
            "partition holds {} blocks of {} bytes, using the first {}",
            blocks, block_size, MAX_BLOCKS
        );
        blocks = MAX_BLOCKS as u64;
    }
    if blocks <= dir_blocks as u64 {
        return Err(CpmError::InvalidGeometry(format!(
            "{total_sectors} sectors leave room for {blocks} blocks"
        )));
    }

    let mut bsh = 3u8;
    let mut exm = 0u8;
    let mut w = block_size / 1024;
    while w > 1 {
        bsh += 1;
        exm = (exm << 1) | 1;
        w >>= 1;
    }
    if blocks > 256 {
        exm >>= 1;
    }

    let mut alloc = 0u16;
    for _ in 0..dir_blocks {
        alloc = (alloc >> 1) | 0x8000;
    }

    Ok(DiskParameterBlock {
        spt: RECORDS_PER_TRACK,
        bsh,
        blm: (records_per_block - 1) as u8,
        exm,
        dsm: (blocks - 1) as u16,
        drm: (dir_blocks * (block_size / ENTRY_SIZE as u32) - 1) as u16,
        al0: (alloc >> 8) as u8,
        al1: alloc as u8,
        cks: 0,
        off: reserved_tracks as u16,
    })
}

/// Format the partition at `start` spanning `total_sectors` sectors.
///
/// Reserved tracks are zeroed, then the directory (or the whole data area)
/// is filled with 0xE5, and the super sector is written last.
pub fn format(
    dev: &mut dyn BlockDevice,
    start: u64,
    total_sectors: u64,
    params: &FormatParams,
) -> CpmResult<DiskParameterBlock> {
    let dpb = synthesize(total_sectors, params)?;
    let geometry = Geometry::from_dpb(start, &dpb)?;
    if geometry.end_sector() > dev.sector_count() {
        return Err(CpmError::InvalidGeometry(format!(
            "disk ends at sector {:#X}, device has {:#X}",
            geometry.end_sector(),
            dev.sector_count()
        )));
    }

    let zeros = [0u8; SECTOR_SIZE];
    for sector in start + 1..geometry.first_sector {
        dev.write(sector, &zeros)?;
    }

    let clear = if params.full_clear {
        geometry.block_count as u64 * geometry.sectors_per_block()
    } else {
        geometry.dir_blocks as u64 * geometry.sectors_per_block()
    };
    let empty = [DELETED; SECTOR_SIZE];
    for sector in geometry.first_sector..geometry.first_sector + clear {
        dev.write(sector, &empty)?;
    }

    dev.write(start, &dpb.to_super_sector())?;
    dev.flush()?;
    debug!(
        "formatted {:#X}: {} blocks of {} bytes, {} entries",
        start, geometry.block_count, geometry.block_size, geometry.dir_entries
    );
    Ok(dpb)
}

/// Human-oriented description of a formatted disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSummary {
    pub start: u64,
    pub size_kib: u64,
    pub reserved_kib: u64,
    pub block_size: u32,
    pub block_count: u32,
    pub dir_entries: u32,
    pub dir_blocks: u32,
    pub alv_bytes: u32,
}

impl DiskSummary {
    pub fn from_dpb(start: u64, dpb: &DiskParameterBlock) -> Self {
        Self {
            start,
            size_kib: dpb.block_count() as u64 * dpb.block_size() as u64 / 1024,
            reserved_kib: dpb.reserved_sectors() * SECTOR_SIZE as u64 / 1024,
            block_size: dpb.block_size(),
            block_count: dpb.block_count(),
            dir_entries: dpb.dir_entries(),
            dir_blocks: dpb.dir_blocks(),
            alv_bytes: dpb.alv_bytes(),
        }
    }

    /// Read the super sector at `start` and describe it.
    pub fn inspect(dev: &mut dyn BlockDevice, start: u64) -> CpmResult<Self> {
        let dpb = read_super_sector(dev, start)?;
        Ok(Self::from_dpb(start, &dpb))
    }

    /// True if the directory has fewer than one entry per 8 blocks.
    pub fn directory_too_small(&self) -> bool {
        needed_dir_blocks(self.block_count, self.block_size) > self.dir_blocks
    }
}

impl fmt::Display for DiskSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Start sector     : {:#X}", self.start)?;
        writeln!(f, "Disk size        : {}Kb", self.size_kib)?;
        writeln!(f, "Reserved sectors : {}Kb", self.reserved_kib)?;
        writeln!(f, "Cluster size     : {} bytes", self.block_size)?;
        writeln!(f, "Num clusters     : {}", self.block_count)?;
        writeln!(f, "Dir entries      : {}", self.dir_entries)?;
        write!(f, "ALV              : {}", self.alv_bytes)?;
        if self.directory_too_small() {
            write!(f, "\nWARNING! Directory space is too small, reformat the disk")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;

    const MB: u64 = 1024 * 1024 / SECTOR_SIZE as u64;

    #[test]
    fn test_dpb_layout() {
        let dpb = DiskParameterBlock {
            spt: 128,
            bsh: 6,
            blm: 63,
            exm: 3,
            dsm: 1018,
            drm: 511,
            al0: 0xC0,
            al1: 0,
            cks: 0,
            off: 2,
        };
        let sector = dpb.to_super_sector();
        assert_eq!(&sector[..8], b"CP/M    ");
        assert_eq!(&sector[8..10], &[128, 0]);
        assert_eq!(&sector[13..15], &1018u16.to_le_bytes());
        assert_eq!(sector[510], 0x55);
        assert_eq!(sector[511], 0xAA);
        assert_eq!(DiskParameterBlock::from_super_sector(&sector, 0).unwrap(), dpb);
    }

    #[test]
    fn test_not_cpm() {
        let mut sector = DiskParameterBlock::default().to_super_sector();
        sector[0] = b'X';
        assert!(matches!(
            DiskParameterBlock::from_super_sector(&sector, 7),
            Err(CpmError::NotCpm(7))
        ));

        let mut sector = DiskParameterBlock::default().to_super_sector();
        sector[511] = 0;
        assert!(DiskParameterBlock::from_super_sector(&sector, 7).is_err());
    }

    #[test]
    fn test_block_size_for() {
        assert_eq!(block_size_for(1024 * 1024, 170), 2048);
        assert_eq!(block_size_for(8 * 1024 * 1024, 170), 8192);
        assert_eq!(block_size_for(1 << 40, 170), 16384);
    }

    #[test]
    fn test_synthesize_8mb() {
        let dpb = synthesize(8 * MB, &FormatParams::default()).unwrap();
        assert_eq!(dpb.block_size(), 8192);
        assert_eq!(dpb.bsh, 6);
        assert_eq!(dpb.exm, 3);
        assert_eq!(dpb.block_count(), 1019);
        assert_eq!(dpb.dir_entries(), 512);
        assert_eq!((dpb.al0, dpb.al1), (0xC0, 0x00));
        assert_eq!(dpb.off, 2);
        assert_eq!(dpb.alv_bytes(), 128);
    }

    #[test]
    fn test_synthesize_corrects_directory() {
        let params = FormatParams {
            sizing: BlockSizing::Fixed(1024),
            ..Default::default()
        };
        let dpb = synthesize(4096, &params).unwrap();
        assert_eq!(dpb.block_count(), 2015);
        assert_eq!(dpb.exm, 0);
        assert_eq!(dpb.dir_blocks(), 8);
        assert_eq!(dpb.dir_entries(), 256);
        assert_eq!((dpb.al0, dpb.al1), (0xFF, 0x00));
    }

    #[test]
    fn test_synthesize_rejects_bad_params() {
        let bad = [
            FormatParams {
                sizing: BlockSizing::Fixed(3000),
                ..Default::default()
            },
            FormatParams {
                sizing: BlockSizing::AllocVector(100),
                ..Default::default()
            },
            FormatParams {
                dir_blocks: 0,
                ..Default::default()
            },
            FormatParams {
                reserved_tracks: 10,
                ..Default::default()
            },
        ];
        for params in bad {
            assert!(synthesize(16 * MB, &params).is_err(), "{:?}", params);
        }
        assert!(synthesize(8, &FormatParams::default()).is_err());
    }

    #[test]
    fn test_format_and_read_back() {
        let total = 2 * MB;
        let mut dev = MemoryDevice::new(total + 10);
        let params = FormatParams {
            reserved_tracks: 1,
            ..Default::default()
        };
        let dpb = format(&mut dev, 10, total, &params).unwrap();

        let read = read_super_sector(&mut dev, 10).unwrap();
        assert_eq!(read, dpb);
        let geometry = Geometry::from_dpb(10, &read).unwrap();
        assert_eq!(geometry.first_sector, 10 + 1 + 32);
        assert_eq!(geometry.block_size, dpb.block_size());

        // Reserved track zeroed, directory filled with E5, data untouched
        assert_eq!(dev.read(11).unwrap(), [0u8; SECTOR_SIZE]);
        assert_eq!(dev.read(geometry.first_sector).unwrap(), [DELETED; SECTOR_SIZE]);
        let data = geometry.block_sector(geometry.dir_blocks as u16);
        assert_eq!(dev.read(data).unwrap(), [0u8; SECTOR_SIZE]);
    }

    #[test]
    fn test_format_full_clear() {
        let total = MB;
        let mut dev = MemoryDevice::new(total);
        let params = FormatParams {
            full_clear: true,
            ..Default::default()
        };
        let dpb = format(&mut dev, 0, total, &params).unwrap();
        let geometry = Geometry::from_dpb(0, &dpb).unwrap();
        assert_eq!(dev.read(geometry.end_sector() - 1).unwrap(), [DELETED; SECTOR_SIZE]);
    }

    #[test]
    fn test_format_past_device_end() {
        let mut dev = MemoryDevice::new(MB);
        assert!(matches!(
            format(&mut dev, 0, 2 * MB, &FormatParams::default()),
            Err(CpmError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_summary_warning() {
        let mut dpb = synthesize(8 * MB, &FormatParams::default()).unwrap();
        let summary = DiskSummary::from_dpb(0, &dpb);
        assert!(!summary.directory_too_small());
        assert_eq!(summary.size_kib, 1019 * 8);

        // One 1K-block directory on a 2015-block disk is too small
        dpb.blm = 7;
        dpb.dsm = 2014;
        dpb.drm = 31;
        let summary = DiskSummary::from_dpb(0, &dpb);
        assert!(summary.directory_too_small());
        assert!(summary.to_string().contains("WARNING"));
    }
}
