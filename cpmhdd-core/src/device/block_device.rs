//! BlockDevice trait - sector interface shared by images and raw disks.

use std::io;

use crate::error::{CpmError, CpmResult};

/// Sector size used by partition tables and every CP/M structure on disk.
pub const SECTOR_SIZE: usize = 512;

/// Random-access storage addressed in absolute 512-byte sectors.
///
/// Implementations report failures as plain I/O errors; the `read` and
/// `write` helpers attach the sector index so the engine can surface
/// `SectorRead` / `SectorWrite`.
pub trait BlockDevice: Send {
    /// Read one sector into `buf`.
    fn read_sector(&mut self, index: u64, buf: &mut [u8; SECTOR_SIZE]) -> io::Result<()>;

    /// Write one sector from `buf`.
    fn write_sector(&mut self, index: u64, buf: &[u8; SECTOR_SIZE]) -> io::Result<()>;

    /// Total number of addressable sectors.
    fn sector_count(&self) -> u64;

    /// Push buffered writes to the backing store.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Read one sector and return it by value.
    fn read(&mut self, index: u64) -> CpmResult<[u8; SECTOR_SIZE]> {
        let mut buf = [0u8; SECTOR_SIZE];
        self.read_sector(index, &mut buf)
            .map_err(|source| CpmError::SectorRead {
                sector: index,
                source,
            })?;
        Ok(buf)
    }

    /// Write one sector.
    fn write(&mut self, index: u64, buf: &[u8; SECTOR_SIZE]) -> CpmResult<()> {
        self.write_sector(index, buf)
            .map_err(|source| CpmError::SectorWrite {
                sector: index,
                source,
            })
    }
}

impl<D: BlockDevice + ?Sized> BlockDevice for Box<D> {
    fn read_sector(&mut self, index: u64, buf: &mut [u8; SECTOR_SIZE]) -> io::Result<()> {
        (**self).read_sector(index, buf)
    }

    fn write_sector(&mut self, index: u64, buf: &[u8; SECTOR_SIZE]) -> io::Result<()> {
        (**self).write_sector(index, buf)
    }

    fn sector_count(&self) -> u64 {
        (**self).sector_count()
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// Error for an access past the end of a device.
pub(crate) fn out_of_range(index: u64, count: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("sector {index} beyond end of device ({count} sectors)"),
    )
}
