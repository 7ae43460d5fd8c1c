//! In-memory block device.

use std::io;

use super::block_device::{out_of_range, BlockDevice, SECTOR_SIZE};

/// Disk image held entirely in memory.
#[derive(Clone, Debug)]
pub struct MemoryDevice {
    data: Vec<u8>,
}

impl MemoryDevice {
    /// Create a zero-filled device of `sectors` sectors.
    pub fn new(sectors: u64) -> Self {
        Self {
            data: vec![0; sectors as usize * SECTOR_SIZE],
        }
    }

    /// Wrap existing image bytes. A trailing partial sector is dropped.
    pub fn from_bytes(mut data: Vec<u8>) -> Self {
        data.truncate(data.len() / SECTOR_SIZE * SECTOR_SIZE);
        Self { data }
    }

    /// Raw image contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn range(&self, index: u64) -> io::Result<std::ops::Range<usize>> {
        let count = self.sector_count();
        if index >= count {
            return Err(out_of_range(index, count));
        }
        let start = index as usize * SECTOR_SIZE;
        Ok(start..start + SECTOR_SIZE)
    }
}

impl BlockDevice for MemoryDevice {
    fn read_sector(&mut self, index: u64, buf: &mut [u8; SECTOR_SIZE]) -> io::Result<()> {
        let range = self.range(index)?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_sector(&mut self, index: u64, buf: &[u8; SECTOR_SIZE]) -> io::Result<()> {
        let range = self.range(index)?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }

    fn sector_count(&self) -> u64 {
        (self.data.len() / SECTOR_SIZE) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_sector() {
        let mut dev = MemoryDevice::new(4);
        let mut sector = [0u8; SECTOR_SIZE];
        sector[0] = 0xAB;
        sector[511] = 0xCD;
        dev.write_sector(2, &sector).unwrap();

        let back = dev.read(2).unwrap();
        assert_eq!(back[0], 0xAB);
        assert_eq!(back[511], 0xCD);
        assert_eq!(dev.as_bytes()[2 * SECTOR_SIZE], 0xAB);
    }

    #[test]
    fn test_out_of_range() {
        let mut dev = MemoryDevice::new(2);
        let mut buf = [0u8; SECTOR_SIZE];
        assert!(dev.read_sector(2, &mut buf).is_err());
        assert!(matches!(
            dev.read(5),
            Err(crate::CpmError::SectorRead { sector: 5, .. })
        ));
        assert!(matches!(
            dev.write(2, &buf),
            Err(crate::CpmError::SectorWrite { sector: 2, .. })
        ));
    }

    #[test]
    fn test_from_bytes_drops_partial_sector() {
        let dev = MemoryDevice::from_bytes(vec![0; SECTOR_SIZE * 3 + 100]);
        assert_eq!(dev.sector_count(), 3);
    }
}
