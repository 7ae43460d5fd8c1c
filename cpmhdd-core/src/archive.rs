//! Import of ZIP archives as batches of files to copy onto a disk.
//!
//! Every regular member becomes one file named after the last component of
//! its path. A member stored under a `userNN/` directory targets that user
//! area; members without one go to whatever area the caller chooses.

use std::io::{Read, Seek};
use std::path::Path;

use zip::ZipArchive;

use crate::dir::MAX_USER;
use crate::error::{CpmError, CpmResult};

/// One member of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    /// Host file name (last path component).
    pub name: String,
    /// User area from a `userNN/` directory, if any.
    pub user: Option<u8>,
    pub read_only: bool,
    pub data: Vec<u8>,
}

/// Parse `userNN` (case-insensitive) into a user number.
fn user_dir(segment: &str) -> Option<u8> {
    let digits = segment.get(..4)?.eq_ignore_ascii_case("user").then(|| &segment[4..])?;
    let user: u8 = digits.parse().ok()?;
    (user <= MAX_USER).then_some(user)
}

/// Load all regular members of a ZIP archive.
pub fn load_archive<R: Read + Seek>(reader: R) -> CpmResult<Vec<ArchiveFile>> {
    let mut archive = ZipArchive::new(reader).map_err(CpmError::Zip)?;
    let mut files = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(CpmError::Zip)?;
        if file.is_dir() {
            continue;
        }

        let path = file.name().replace('\\', "/");
        let mut segments = path.rsplit('/');
        let name = segments.next().unwrap_or_default().to_string();
        if name.is_empty() {
            continue;
        }
        let user = segments.next().and_then(user_dir);
        let read_only = file.unix_mode().is_some_and(|mode| mode & 0o222 == 0);

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        files.push(ArchiveFile {
            name,
            user,
            read_only,
            data,
        });
    }
    Ok(files)
}

/// Load an archive from a file path.
pub fn load_archive_from_path(path: &Path) -> CpmResult<Vec<ArchiveFile>> {
    let file = std::fs::File::open(path)?;
    load_archive(std::io::BufReader::new(file))
}

/// True if `path` names a ZIP archive.
pub fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}
