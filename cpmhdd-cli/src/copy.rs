//! Copy host files and ZIP archives into one disk of a device.

use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info, warn};

use cpmhdd_core::{
    is_archive, load_archive_from_path, Attributes, Catalog, CpmError, CpmName, NodeId, PutMode,
};

use crate::ops::host_attributes;
use crate::{prompt, CliResult};

struct Source {
    name: String,
    user: Option<u8>,
    attrs: Attributes,
    data: Vec<u8>,
}

fn load_sources(paths: &[PathBuf]) -> CliResult<Vec<Source>> {
    let mut sources = Vec::new();
    for path in paths {
        if is_archive(path) {
            let files = load_archive_from_path(path)?;
            info!("{}: {} files", path.display(), files.len());
            sources.extend(files.into_iter().map(|f| Source {
                name: f.name,
                user: f.user,
                attrs: if f.read_only {
                    Attributes::READ_ONLY
                } else {
                    Attributes::empty()
                },
                data: f.data,
            }));
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| format!("{} has no file name", path.display()))?;
        sources.push(Source {
            name,
            user: None,
            attrs: host_attributes(path)?,
            data: fs::read(path)?,
        });
    }
    Ok(sources)
}

/// Copy `paths` into disk `drive` of the device mounted as `device`.
///
/// Archive members under a `userNN/` directory go to that user area; all
/// other files go to `user`. Existing files are replaced when `replace` is
/// set, otherwise the user is asked. A file that can't be written is skipped
/// and the rest are still copied; the call fails afterwards if any was
/// skipped. Returns the number of files copied.
pub fn run(
    catalog: &mut Catalog,
    device: &str,
    drive: &str,
    user: u8,
    paths: &[PathBuf],
    replace: bool,
) -> CliResult<usize> {
    let disk_path = format!("{device}/{drive}");
    let (copied, failed) = copy_sources(catalog, &disk_path, user, load_sources(paths)?, replace)?;
    if failed > 0 {
        return Err(format!("{failed} file(s) not copied, {copied} copied").into());
    }
    Ok(copied)
}

/// Write each source into the disk at `disk_path`; returns (copied, failed).
fn copy_sources(
    catalog: &mut Catalog,
    disk_path: &str,
    user: u8,
    sources: Vec<Source>,
    replace: bool,
) -> CliResult<(usize, usize)> {
    let disk_id = catalog.resolve(disk_path)?;
    let mut copied = 0;
    let mut failed = 0;

    for source in sources {
        let dir = format!("{disk_path}/user{:02}", source.user.unwrap_or(user));
        let mut mode = PutMode::CreateNew;
        loop {
            match catalog.write_file(&dir, &source.name, &source.data, source.attrs, mode) {
                Ok(id) => {
                    info!("{} ({} bytes)", catalog.path_of(id), source.data.len());
                    copied += 1;
                }
                Err(CpmError::FileExists(name)) => {
                    if replace || prompt::confirm(&format!("{dir}/{name} exists, overwrite?"))? {
                        mode = PutMode::Overwrite;
                        continue;
                    }
                    warn!("skipped {}", name);
                }
                Err(e) => {
                    error!("skip {}: {}", source.name, e);
                    if matches!(e, CpmError::SectorRead { .. } | CpmError::SectorWrite { .. }) {
                        remove_partial(catalog, disk_id, &dir, &source.name);
                    }
                    failed += 1;
                }
            }
            break;
        }
    }
    Ok((copied, failed))
}

/// Drop whatever a failed write left behind and rescan the disk.
fn remove_partial(catalog: &mut Catalog, disk_id: NodeId, dir: &str, name: &str) {
    if let Err(e) = catalog.refresh_disk(disk_id) {
        error!("rescan failed: {}", e);
        return;
    }
    let file = format!("{dir}/{}", CpmName::encode(name));
    if catalog.resolve(&file).is_ok() {
        match catalog.delete_file(&file) {
            Ok(()) => warn!("removed partial {}", file),
            Err(e) => error!("can't remove partial {}: {}", file, e),
        }
    }
}

/// Label a device by its file name.
pub fn device_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
