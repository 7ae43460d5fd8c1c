//! Block device over a flat image file or a raw disk node.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::block_device::{out_of_range, BlockDevice, SECTOR_SIZE};

/// Sector access to anything seekable: an image file, `/dev/sdX`, or a cursor.
pub struct ImageDevice<F> {
    inner: F,
    sectors: u64,
}

impl ImageDevice<File> {
    /// Open an existing image or device node.
    pub fn open(path: impl AsRef<Path>, writable: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path.as_ref())?;
        Self::new(file)
    }

    /// Create (or truncate) an image file of `sectors` zeroed sectors.
    pub fn create(path: impl AsRef<Path>, sectors: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(sectors * SECTOR_SIZE as u64)?;
        Self::new(file)
    }
}

impl<F: Read + Write + Seek> ImageDevice<F> {
    /// Wrap a seekable stream. Its size is measured once, by seeking to the end,
    /// which also works for block device nodes whose metadata length is zero.
    pub fn new(mut inner: F) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        Ok(Self {
            inner,
            sectors: len / SECTOR_SIZE as u64,
        })
    }

    pub fn into_inner(self) -> F {
        self.inner
    }

    fn seek_to(&mut self, index: u64) -> io::Result<()> {
        if index >= self.sectors {
            return Err(out_of_range(index, self.sectors));
        }
        self.inner
            .seek(SeekFrom::Start(index * SECTOR_SIZE as u64))?;
        Ok(())
    }
}

impl<F: Read + Write + Seek + Send> BlockDevice for ImageDevice<F> {
    fn read_sector(&mut self, index: u64, buf: &mut [u8; SECTOR_SIZE]) -> io::Result<()> {
        self.seek_to(index)?;
        self.inner.read_exact(buf)
    }

    fn write_sector(&mut self, index: u64, buf: &[u8; SECTOR_SIZE]) -> io::Result<()> {
        self.seek_to(index)?;
        self.inner.write_all(buf)
    }

    fn sector_count(&self) -> u64 {
        self.sectors
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
