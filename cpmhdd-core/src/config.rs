//! Persistent settings, stored as JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dpb::FormatParams;
use crate::error::CpmResult;

/// Default settings file name.
pub const SETTINGS_FILE: &str = "cpmhdd.json";

/// Settings shared by every front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Append diagnostics to `log_file`.
    pub log_enabled: bool,
    pub log_file: PathBuf,
    /// Allow raw device nodes listed in `devices`.
    pub physical_enabled: bool,
    /// Disk images mounted by default.
    pub images: Vec<PathBuf>,
    /// Raw device nodes, e.g. `/dev/sdb`.
    pub devices: Vec<PathBuf>,
    /// Defaults for the format command.
    pub format: FormatParams,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_enabled: false,
            log_file: PathBuf::from("cpmhdd.log"),
            physical_enabled: false,
            images: Vec::new(),
            devices: Vec::new(),
            format: FormatParams::default(),
        }
    }
}

impl Settings {
    /// Load settings; a missing file yields the defaults.
    pub fn load(path: &Path) -> CpmResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load settings, writing a default file first if none exists.
    pub fn load_or_create(path: &Path) -> CpmResult<Self> {
        if !path.exists() {
            Self::default().save(path)?;
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> CpmResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Pretty-printed JSON, as written by `save`.
    pub fn to_json(&self) -> CpmResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Add an image; returns false if it was already listed.
    pub fn add_image(&mut self, image: &Path) -> bool {
        if self.images.iter().any(|p| p == image) {
            return false;
        }
        self.images.push(image.to_path_buf());
        true
    }

    /// Remove an image; returns false if it was not listed.
    pub fn remove_image(&mut self, image: &Path) -> bool {
        let before = self.images.len();
        self.images.retain(|p| p != image);
        self.images.len() != before
    }

    /// Everything to mount: images, then device nodes when enabled.
    pub fn sources(&self) -> Vec<&Path> {
        let devices = self
            .devices
            .iter()
            .filter(|_| self.physical_enabled);
        self.images.iter().chain(devices).map(PathBuf::as_path).collect()
    }
}
