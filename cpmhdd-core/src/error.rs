//! Error types for the CP/M disk engine.

use thiserror::Error;

use crate::bitmap::MapKind;

/// Errors that can occur while walking, mounting or modifying a disk.
#[derive(Error, Debug)]
pub enum CpmError {
    #[error("Can't read sector {sector:#X}: {source}")]
    SectorRead {
        sector: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Can't write sector {sector:#X}: {source}")]
    SectorWrite {
        sector: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("No CP/M super sector at {0:#X}")]
    NotCpm(u64),

    #[error("Corrupt partition table at sector {0:#X}")]
    CorruptChain(u64),

    #[error("Disk full")]
    DiskFull,

    #[error("Directory full")]
    DirectoryFull,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("File exists: {0}")]
    FileExists(String),

    #[error("{map} unit {index} is already free")]
    DoubleFree { map: MapKind, index: usize },

    #[error("{map} unit {index} is already allocated")]
    AlreadyAllocated { map: MapKind, index: usize },

    #[error("{map} unit {index} is out of range")]
    OutOfRange { map: MapKind, index: usize },

    #[error("Invalid user area: {0}")]
    InvalidUser(u8),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid disk geometry: {0}")]
    InvalidGeometry(String),

    #[error("File too large: {0} bytes")]
    FileTooLarge(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for CP/M disk operations.
pub type CpmResult<T> = Result<T, CpmError>;
