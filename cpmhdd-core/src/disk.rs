//! Mounted logical disk: directory scan and file I/O.
//!
//! A `LogicalDisk` holds the geometry and occupancy maps of one CP/M
//! partition. It does not own the device; every operation borrows it, so
//! several disks on one device can be mounted side by side.

use std::collections::HashMap;

use log::{debug, error, info, warn};

use crate::bitmap::AllocationMaps;
use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::dir::{
    Attributes, CpmName, DirEntry, ExtentCounter, ExtentPlan, DELETED, ENTRIES_PER_SECTOR,
    ENTRY_SIZE, MAX_USER, POINTERS_PER_ENTRY, RECORD_SIZE,
};
use crate::dpb::{read_super_sector, DiskParameterBlock, Geometry};
use crate::error::{CpmError, CpmResult};

/// A file as seen by the directory scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub user: u8,
    pub name: CpmName,
    pub attributes: Attributes,
    /// Size in bytes.
    pub size: u64,
    /// Directory entries the file occupies.
    pub entries: usize,
}

/// One mounted CP/M partition.
#[derive(Debug, Clone)]
pub struct LogicalDisk {
    dpb: DiskParameterBlock,
    geometry: Geometry,
    maps: AllocationMaps,
}

fn check_user(user: u8) -> CpmResult<()> {
    if user > MAX_USER {
        return Err(CpmError::InvalidUser(user));
    }
    Ok(())
}

impl LogicalDisk {
    /// Mount the partition whose super sector is at `start`.
    ///
    /// Returns the disk together with the files found by the directory scan.
    pub fn mount(dev: &mut dyn BlockDevice, start: u64) -> CpmResult<(Self, Vec<FileInfo>)> {
        let dpb = read_super_sector(dev, start)?;
        let geometry = Geometry::from_dpb(start, &dpb)?;
        if geometry.end_sector() > dev.sector_count() {
            warn!(
                "disk at {:#X} ends past the device ({:#X} > {:#X})",
                start,
                geometry.end_sector(),
                dev.sector_count()
            );
        }

        let mut disk = Self {
            dpb,
            geometry,
            maps: AllocationMaps::new(&geometry),
        };
        let files = disk.rescan(dev)?;
        info!(
            "found CP/M disk at {:#X}, size {}Kb, dirs {}",
            start,
            geometry.block_count as u64 * geometry.block_size as u64 / 1024,
            geometry.dir_entries
        );
        Ok((disk, files))
    }

    pub fn dpb(&self) -> &DiskParameterBlock {
        &self.dpb
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn maps(&self) -> &AllocationMaps {
        &self.maps
    }

    /// Free data space in bytes.
    pub fn free_bytes(&self) -> u64 {
        self.maps.blocks.free_count() as u64 * self.geometry.block_size as u64
    }

    /// Free directory slots.
    pub fn free_entries(&self) -> usize {
        self.maps.dirs.free_count()
    }

    /// Rebuild both maps from the on-disk directory and list its files.
    ///
    /// Out-of-range or doubly claimed block pointers are logged and skipped.
    pub fn rescan(&mut self, dev: &mut dyn BlockDevice) -> CpmResult<Vec<FileInfo>> {
        let mut maps = AllocationMaps::new(&self.geometry);
        let mut files: Vec<FileInfo> = Vec::new();
        let mut index: HashMap<(u8, CpmName), usize> = HashMap::new();

        for (slot, entry) in read_directory(dev, &self.geometry)?.into_iter().enumerate() {
            if entry.is_deleted() {
                continue;
            }
            maps.claim_directory(slot)?;

            let user = entry.user();
            let name = entry.name();
            if user > MAX_USER {
                debug!("slot {}: skip entry of user {:#04X}", slot, user);
                continue;
            }

            for block in entry.blocks() {
                if !self.geometry.is_data_block(block) {
                    warn!("{}:{}: block {} out of range, skipped", user, name, block);
                    continue;
                }
                match maps.claim_shared_block(block) {
                    Ok(false) => {}
                    Ok(true) => warn!("{}:{}: block {} is cross-linked", user, name, block),
                    Err(e) => warn!("{}:{}: {}", user, name, e),
                }
            }

            match index.get(&(user, name)) {
                Some(&i) => {
                    let file = &mut files[i];
                    file.size = file.size.max(entry.byte_len());
                    file.entries += 1;
                }
                None => {
                    index.insert((user, name), files.len());
                    files.push(FileInfo {
                        user,
                        name,
                        attributes: entry.attributes(),
                        size: entry.byte_len(),
                        entries: 1,
                    });
                }
            }
        }

        debug!(
            "scan {:#X}: {} files, {} blocks free, {} slots free",
            self.geometry.start,
            files.len(),
            maps.blocks.free_count(),
            maps.dirs.free_count()
        );
        self.maps = maps;
        Ok(files)
    }

    /// Live entries of a file with their slot numbers, ordered by extent.
    pub fn find_entries(
        &self,
        dev: &mut dyn BlockDevice,
        user: u8,
        name: &CpmName,
    ) -> CpmResult<Vec<(usize, DirEntry)>> {
        check_user(user)?;
        let mut found: Vec<(usize, DirEntry)> = read_directory(dev, &self.geometry)?
            .into_iter()
            .enumerate()
            .filter(|(_, entry)| entry.matches(user, name))
            .collect();
        found.sort_by_key(|(_, entry)| entry.end_offset());
        Ok(found)
    }

    /// True if `name` exists in `user`'s area.
    pub fn exists(&self, dev: &mut dyn BlockDevice, user: u8, name: &CpmName) -> CpmResult<bool> {
        Ok(!self.find_entries(dev, user, name)?.is_empty())
    }

    /// Directory information for one file.
    pub fn stat(&self, dev: &mut dyn BlockDevice, user: u8, name: &CpmName) -> CpmResult<FileInfo> {
        let entries = self.find_entries(dev, user, name)?;
        let first = entries
            .first()
            .ok_or_else(|| CpmError::FileNotFound(name.to_string()))?;
        Ok(FileInfo {
            user,
            name: *name,
            attributes: first.1.attributes(),
            size: entries.iter().map(|(_, e)| e.byte_len()).max().unwrap_or(0),
            entries: entries.len(),
        })
    }

    /// Read a whole file.
    ///
    /// A block pointer outside the data area ends the read there; the bytes
    /// gathered so far are returned and the truncation is logged.
    pub fn read_file(
        &self,
        dev: &mut dyn BlockDevice,
        user: u8,
        name: &CpmName,
    ) -> CpmResult<Vec<u8>> {
        let entries = self.find_entries(dev, user, name)?;
        if entries.is_empty() {
            return Err(CpmError::FileNotFound(name.to_string()));
        }
        let size = entries
            .iter()
            .map(|(_, e)| e.byte_len())
            .max()
            .unwrap_or(0) as usize;

        let mut data = Vec::with_capacity(size);
        'entries: for (_, entry) in &entries {
            for block in entry.blocks() {
                if data.len() >= size {
                    break 'entries;
                }
                if !self.geometry.is_data_block(block) {
                    error!(
                        "{}:{}: block {} out of range, file truncated at {} of {} bytes",
                        user,
                        name,
                        block,
                        data.len(),
                        size
                    );
                    break 'entries;
                }
                self.read_block(dev, block, size - data.len(), &mut data)?;
            }
        }

        if data.len() < size {
            warn!("{}:{}: read {} of {} bytes", user, name, data.len(), size);
        }
        data.truncate(size);
        Ok(data)
    }

    fn read_block(
        &self,
        dev: &mut dyn BlockDevice,
        block: u16,
        wanted: usize,
        out: &mut Vec<u8>,
    ) -> CpmResult<()> {
        let first = self.geometry.block_sector(block);
        let sectors = self
            .geometry
            .sectors_per_block()
            .min(wanted.div_ceil(SECTOR_SIZE) as u64);
        for sector in first..first + sectors {
            out.extend_from_slice(&dev.read(sector)?);
        }
        Ok(())
    }

    /// Write a new file.
    ///
    /// Directory slots and blocks are reserved before any sector is touched,
    /// so `DiskFull` and `DirectoryFull` leave the disk unchanged. Each
    /// directory entry is written once its data blocks are on disk. If a
    /// sector write fails, entries already written stay on disk and the
    /// reservations of the rest are released.
    pub fn write_file(
        &mut self,
        dev: &mut dyn BlockDevice,
        user: u8,
        name: &CpmName,
        data: &[u8],
        attrs: Attributes,
    ) -> CpmResult<FileInfo> {
        check_user(user)?;
        let block_size = self.geometry.block_size as usize;
        let plan = ExtentPlan::for_size(data.len(), self.geometry.block_size)?;
        if self.exists(dev, user, name)? {
            return Err(CpmError::FileExists(name.to_string()));
        }

        let slots = self.maps.allocate_directory(plan.entries)?;
        let blocks = match self.maps.allocate_blocks(plan.blocks) {
            Ok(blocks) => blocks,
            Err(e) => {
                self.release(&slots, &[]);
                return Err(e);
            }
        };
        debug!(
            "write {}:{}: {} bytes, {} blocks, slots {:?}",
            user,
            name,
            data.len(),
            blocks.len(),
            slots
        );

        let mut counter = ExtentCounter::new();
        let mut chunks = data.chunks(block_size);
        for (k, &slot) in slots.iter().enumerate() {
            let mut entry = DirEntry::new(user, name, attrs);
            let entry_blocks = blocks
                .iter()
                .skip(k * POINTERS_PER_ENTRY)
                .take(POINTERS_PER_ENTRY);
            for (i, &block) in entry_blocks.enumerate() {
                let chunk = chunks.next().unwrap_or(&[]);
                if let Err(e) = self.write_block(dev, block, chunk) {
                    self.release(&slots[k..], &blocks[k * POINTERS_PER_ENTRY..]);
                    return Err(e);
                }
                counter.advance(chunk.len() as u32);
                entry.set_block(i, block);
            }
            entry.set_ex(counter.extent());
            entry.set_rc(counter.record_count());
            if k + 1 == slots.len() {
                entry.set_last_record_bytes((data.len() % RECORD_SIZE as usize) as u8);
            }
            if let Err(e) = self.write_entry(dev, slot, &entry) {
                self.release(&slots[k..], &blocks[k * POINTERS_PER_ENTRY..]);
                return Err(e);
            }
        }
        dev.flush()?;

        Ok(FileInfo {
            user,
            name: *name,
            attributes: attrs,
            size: data.len() as u64,
            entries: slots.len(),
        })
    }

    /// Write a file, replacing any existing file of the same name.
    ///
    /// Capacity is checked against the space the old file would free before
    /// anything is deleted, so a `DiskFull` keeps the old file intact.
    pub fn replace_file(
        &mut self,
        dev: &mut dyn BlockDevice,
        user: u8,
        name: &CpmName,
        data: &[u8],
        attrs: Attributes,
    ) -> CpmResult<FileInfo> {
        let plan = ExtentPlan::for_size(data.len(), self.geometry.block_size)?;
        let old = self.find_entries(dev, user, name)?;
        let old_blocks = old
            .iter()
            .flat_map(|(_, e)| e.blocks())
            .filter(|&b| self.geometry.is_data_block(b) && self.maps.shared_refs(b) == 0)
            .count();
        if plan.entries > self.maps.dirs.free_count() + old.len() {
            return Err(CpmError::DirectoryFull);
        }
        if plan.blocks > self.maps.blocks.free_count() + old_blocks {
            return Err(CpmError::DiskFull);
        }
        if !old.is_empty() {
            self.delete_file(dev, user, name)?;
        }
        self.write_file(dev, user, name, data, attrs)
    }

    fn release(&mut self, slots: &[usize], blocks: &[u16]) {
        for &slot in slots {
            if let Err(e) = self.maps.free_directory(slot) {
                error!("{}", e);
            }
        }
        if let Err(e) = self.maps.free_blocks(blocks) {
            error!("{}", e);
        }
    }

    fn write_block(&self, dev: &mut dyn BlockDevice, block: u16, chunk: &[u8]) -> CpmResult<()> {
        let first = self.geometry.block_sector(block);
        for i in 0..self.geometry.sectors_per_block() {
            let mut sector = [DELETED; SECTOR_SIZE];
            let offset = i as usize * SECTOR_SIZE;
            if offset < chunk.len() {
                let part = &chunk[offset..chunk.len().min(offset + SECTOR_SIZE)];
                sector[..part.len()].copy_from_slice(part);
            }
            dev.write(first + i, &sector)?;
        }
        Ok(())
    }

    fn write_entry(&self, dev: &mut dyn BlockDevice, slot: usize, entry: &DirEntry) -> CpmResult<()> {
        let index = self.geometry.dir_sector(slot);
        let mut sector = dev.read(index)?;
        let offset = (slot % ENTRIES_PER_SECTOR) * ENTRY_SIZE;
        entry.write_to(&mut sector[offset..offset + ENTRY_SIZE]);
        dev.write(index, &sector)
    }

    /// Delete a file, releasing its slots and blocks.
    ///
    /// Only directory sectors holding the file's entries are rewritten.
    pub fn delete_file(
        &mut self,
        dev: &mut dyn BlockDevice,
        user: u8,
        name: &CpmName,
    ) -> CpmResult<()> {
        check_user(user)?;
        let geometry = self.geometry;
        let maps = &mut self.maps;
        let deleted = update_entries(dev, &geometry, |slot, entry| {
            if !entry.matches(user, name) {
                return false;
            }
            entry.mark_deleted();
            if let Err(e) = maps.free_directory(slot) {
                warn!("{}", e);
            }
            for block in entry.blocks() {
                if geometry.is_data_block(block) {
                    if let Err(e) = maps.free_block(block) {
                        warn!("{}:{}: {}", user, name, e);
                    }
                }
            }
            true
        })?;
        if deleted == 0 {
            return Err(CpmError::FileNotFound(name.to_string()));
        }
        debug!("deleted {}:{} ({} entries)", user, name, deleted);
        dev.flush()?;
        Ok(())
    }

    /// Rename a file in place, optionally moving it to another user area.
    pub fn rename_file(
        &mut self,
        dev: &mut dyn BlockDevice,
        user: u8,
        name: &CpmName,
        new_user: u8,
        new_name: &CpmName,
    ) -> CpmResult<()> {
        check_user(user)?;
        check_user(new_user)?;
        if (user, name) == (new_user, new_name) {
            return Ok(());
        }
        if self.exists(dev, new_user, new_name)? {
            return Err(CpmError::FileExists(new_name.to_string()));
        }
        let renamed = update_entries(dev, &self.geometry, |_, entry| {
            if !entry.matches(user, name) {
                return false;
            }
            let attrs = entry.attributes();
            let mut bytes = *entry.as_bytes();
            bytes[0] = new_user;
            bytes[1..12].copy_from_slice(&new_name.to_raw(attrs));
            *entry = DirEntry::parse(&bytes);
            true
        })?;
        if renamed == 0 {
            return Err(CpmError::FileNotFound(name.to_string()));
        }
        dev.flush()?;
        Ok(())
    }
}

/// Read every directory slot.
fn read_directory(dev: &mut dyn BlockDevice, geometry: &Geometry) -> CpmResult<Vec<DirEntry>> {
    let mut entries = Vec::with_capacity(geometry.dir_entries as usize);
    for i in 0..geometry.dir_sectors() {
        let sector = dev.read(geometry.first_sector + i)?;
        for raw in sector.chunks_exact(ENTRY_SIZE) {
            if entries.len() == geometry.dir_entries as usize {
                break;
            }
            entries.push(DirEntry::parse(raw));
        }
    }
    Ok(entries)
}

/// Apply `f` to every directory slot, writing back only sectors where it
/// reported a change. Returns the number of changed entries.
fn update_entries(
    dev: &mut dyn BlockDevice,
    geometry: &Geometry,
    mut f: impl FnMut(usize, &mut DirEntry) -> bool,
) -> CpmResult<usize> {
    let mut changed = 0;
    for i in 0..geometry.dir_sectors() {
        let index = geometry.first_sector + i;
        let mut sector = dev.read(index)?;
        let mut dirty = false;
        for (j, raw) in sector.chunks_exact_mut(ENTRY_SIZE).enumerate() {
            let slot = i as usize * ENTRIES_PER_SECTOR + j;
            if slot >= geometry.dir_entries as usize {
                break;
            }
            let mut entry = DirEntry::parse(raw);
            if f(slot, &mut entry) {
                entry.write_to(raw);
                dirty = true;
                changed += 1;
            }
        }
        if dirty {
            dev.write(index, &sector)?;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;
    use crate::dpb::{format, FormatParams};

    const TOTAL: u64 = 2048;

    fn formatted() -> (MemoryDevice, LogicalDisk) {
        let mut dev = MemoryDevice::new(TOTAL);
        format(&mut dev, 0, TOTAL, &FormatParams::default()).unwrap();
        let (disk, files) = LogicalDisk::mount(&mut dev, 0).unwrap();
        assert!(files.is_empty());
        (dev, disk)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
    }

    #[test]
    fn test_mount_empty() {
        let (_, disk) = formatted();
        let g = disk.geometry();
        assert_eq!(g.block_size, 2048);
        assert_eq!(disk.maps().blocks.used_count(), g.dir_blocks as usize);
        assert_eq!(disk.free_entries(), g.dir_entries as usize);
    }

    #[test]
    fn test_mount_not_cpm() {
        let mut dev = MemoryDevice::new(16);
        assert!(matches!(
            LogicalDisk::mount(&mut dev, 0),
            Err(CpmError::NotCpm(0))
        ));
    }

    #[test]
    fn test_write_read_small() {
        let (mut dev, mut disk) = formatted();
        let name = CpmName::encode("hello.txt");
        let info = disk
            .write_file(&mut dev, 0, &name, b"Hello, world!", Attributes::empty())
            .unwrap();
        assert_eq!(info.size, 13);
        assert_eq!(info.entries, 1);

        assert!(disk.exists(&mut dev, 0, &name).unwrap());
        assert!(!disk.exists(&mut dev, 1, &name).unwrap());
        assert_eq!(disk.read_file(&mut dev, 0, &name).unwrap(), b"Hello, world!");
    }

    #[test]
    fn test_write_existing_rejected() {
        let (mut dev, mut disk) = formatted();
        let name = CpmName::encode("A.COM");
        disk.write_file(&mut dev, 0, &name, &[1], Attributes::empty())
            .unwrap();
        let before = disk.maps().clone();
        assert!(matches!(
            disk.write_file(&mut dev, 0, &name, &[2], Attributes::empty()),
            Err(CpmError::FileExists(_))
        ));
        assert_eq!(disk.maps(), &before);
    }

    #[test]
    fn test_extent_fields_on_disk() {
        let (mut dev, mut disk) = formatted();
        let name = CpmName::encode("BIG.DAT");
        disk.write_file(&mut dev, 2, &name, &pattern(16384 + 200), Attributes::empty())
            .unwrap();

        let entries = disk.find_entries(&mut dev, 2, &name).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[0].1.ex(), entries[0].1.rc()), (0, 128));
        assert_eq!((entries[1].1.ex(), entries[1].1.rc()), (1, 2));
        assert_eq!(entries[1].1.last_record_bytes(), 200 - 128);
        assert_eq!(entries[0].1.blocks().count(), 8);
        assert_eq!(entries[1].1.blocks().count(), 1);
    }

    #[test]
    fn test_disk_full_leaves_disk_untouched() {
        let (mut dev, mut disk) = formatted();
        let before_maps = disk.maps().clone();
        let before_image = dev.as_bytes().to_vec();
        let too_big = disk.free_bytes() as usize + 1;
        assert!(matches!(
            disk.write_file(
                &mut dev,
                0,
                &CpmName::encode("HUGE"),
                &vec![0; too_big],
                Attributes::empty()
            ),
            Err(CpmError::DiskFull)
        ));
        assert_eq!(disk.maps(), &before_maps);
        assert_eq!(dev.as_bytes(), &before_image[..]);
    }

    #[test]
    fn test_delete_frees_everything() {
        let (mut dev, mut disk) = formatted();
        let before = disk.maps().clone();
        let name = CpmName::encode("GONE.TXT");
        disk.write_file(&mut dev, 5, &name, &pattern(40_000), Attributes::empty())
            .unwrap();
        assert_ne!(disk.maps(), &before);

        disk.delete_file(&mut dev, 5, &name).unwrap();
        assert!(!disk.exists(&mut dev, 5, &name).unwrap());
        assert_eq!(disk.maps(), &before);
        assert!(matches!(
            disk.delete_file(&mut dev, 5, &name),
            Err(CpmError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_rescan_matches_live_maps() {
        let (mut dev, mut disk) = formatted();
        for (i, len) in [0usize, 1, 2048, 16384, 50_000].iter().enumerate() {
            let name = CpmName::encode(&format!("F{i}.BIN"));
            disk.write_file(&mut dev, 0, &name, &pattern(*len), Attributes::empty())
                .unwrap();
        }
        disk.delete_file(&mut dev, 0, &CpmName::encode("F2.BIN"))
            .unwrap();

        let live = disk.maps().clone();
        let files = disk.rescan(&mut dev).unwrap();
        assert_eq!(disk.maps(), &live);
        assert_eq!(files.len(), 4);
        let sizes: Vec<u64> = files.iter().map(|f| f.size).collect();
        assert!(sizes.contains(&50_000));
        assert!(sizes.contains(&0));
    }

    #[test]
    fn test_out_of_range_pointer_truncates() {
        let (mut dev, mut disk) = formatted();
        let name = CpmName::encode("BAD.DAT");
        let data = pattern(3 * 2048);
        disk.write_file(&mut dev, 0, &name, &data, Attributes::empty())
            .unwrap();

        // Corrupt the second block pointer of the only entry
        let geometry = *disk.geometry();
        let mut sector = dev.read(geometry.first_sector).unwrap();
        sector[16 + 2..16 + 4].copy_from_slice(&0xFFF0u16.to_le_bytes());
        dev.write(geometry.first_sector, &sector).unwrap();

        let files = disk.rescan(&mut dev).unwrap();
        assert_eq!(files[0].size, 3 * 2048);
        let read = disk.read_file(&mut dev, 0, &name).unwrap();
        assert_eq!(read, &data[..2048]);
    }

    #[test]
    fn test_cross_linked_block_survives_delete() {
        let (mut dev, mut disk) = formatted();
        let a = CpmName::encode("A.DAT");
        let b = CpmName::encode("B.DAT");
        let a_data = vec![0x11; 2048];
        disk.write_file(&mut dev, 0, &a, &a_data, Attributes::empty())
            .unwrap();
        disk.write_file(&mut dev, 0, &b, &[0x22; 2048], Attributes::empty())
            .unwrap();

        // Point B's only block at A's block
        let (_, a_entry) = disk.find_entries(&mut dev, 0, &a).unwrap().remove(0);
        let (b_slot, _) = disk.find_entries(&mut dev, 0, &b).unwrap().remove(0);
        let shared = a_entry.block(0);
        let geometry = *disk.geometry();
        let index = geometry.dir_sector(b_slot);
        let mut sector = dev.read(index).unwrap();
        let offset = (b_slot % ENTRIES_PER_SECTOR) * ENTRY_SIZE + 16;
        sector[offset..offset + 2].copy_from_slice(&shared.to_le_bytes());
        dev.write(index, &sector).unwrap();

        disk.rescan(&mut dev).unwrap();
        assert!(disk.maps().blocks.is_used(shared as usize));
        assert_eq!(disk.maps().shared_refs(shared), 1);
        let free = disk.maps().blocks.free_count();

        disk.delete_file(&mut dev, 0, &b).unwrap();
        assert!(disk.maps().blocks.is_used(shared as usize));
        assert_eq!(disk.maps().shared_refs(shared), 0);
        assert_eq!(disk.maps().blocks.free_count(), free);

        let c = CpmName::encode("C.DAT");
        disk.write_file(&mut dev, 0, &c, &[0xAA; 4096], Attributes::empty())
            .unwrap();
        assert_eq!(disk.read_file(&mut dev, 0, &a).unwrap(), a_data);

        disk.delete_file(&mut dev, 0, &a).unwrap();
        assert!(!disk.maps().blocks.is_used(shared as usize));
        let live = disk.maps().clone();
        disk.rescan(&mut dev).unwrap();
        assert_eq!(disk.maps(), &live);
    }

    #[test]
    fn test_rename_across_users() {
        let (mut dev, mut disk) = formatted();
        let old = CpmName::encode("OLD.TXT");
        let new = CpmName::encode("NEW.TXT");
        disk.write_file(&mut dev, 0, &old, b"data", Attributes::READ_ONLY)
            .unwrap();

        disk.rename_file(&mut dev, 0, &old, 3, &new).unwrap();
        assert!(!disk.exists(&mut dev, 0, &old).unwrap());
        let info = disk.stat(&mut dev, 3, &new).unwrap();
        assert_eq!(info.size, 4);
        assert_eq!(info.attributes, Attributes::READ_ONLY);
    }

    #[test]
    fn test_replace_keeps_old_file_when_full() {
        let (mut dev, mut disk) = formatted();
        let name = CpmName::encode("KEEP.DAT");
        disk.write_file(&mut dev, 0, &name, &pattern(4096), Attributes::empty())
            .unwrap();

        let too_big = disk.free_bytes() as usize + 4096 + 1;
        assert!(matches!(
            disk.replace_file(&mut dev, 0, &name, &vec![1; too_big], Attributes::empty()),
            Err(CpmError::DiskFull)
        ));
        assert_eq!(disk.read_file(&mut dev, 0, &name).unwrap(), pattern(4096));

        // Exactly the freed space plus the free space fits
        let fits = disk.free_bytes() as usize + 4096;
        disk.replace_file(&mut dev, 0, &name, &vec![1; fits], Attributes::empty())
            .unwrap();
        assert_eq!(disk.free_bytes(), 0);
    }

    #[test]
    fn test_invalid_user() {
        let (mut dev, mut disk) = formatted();
        assert!(matches!(
            disk.write_file(&mut dev, 16, &CpmName::encode("X"), &[], Attributes::empty()),
            Err(CpmError::InvalidUser(16))
        ));
    }
}
