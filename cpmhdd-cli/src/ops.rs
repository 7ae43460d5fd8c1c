//! Path-based operations on the catalog of every configured device.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use log::info;

use cpmhdd_core::{Attributes, Catalog, DiskSummary, EntryKind, NodeKind, PutMode, Transfer};

use crate::CliResult;

/// What `get` does when the host file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostWrite {
    Fail,
    Overwrite,
    /// Append the bytes past the host file's current length.
    Resume,
}

fn attr_flags(attrs: Attributes) -> String {
    let mut flags = String::new();
    flags.push(if attrs.contains(Attributes::READ_ONLY) { 'R' } else { '-' });
    flags.push(if attrs.contains(Attributes::HIDDEN) { 'H' } else { '-' });
    flags
}

/// CP/M attributes for a host file: read-only from its permissions, hidden
/// for dot files.
pub fn host_attributes(path: &Path) -> CliResult<Attributes> {
    let mut attrs = Attributes::empty();
    if fs::metadata(path)?.permissions().readonly() {
        attrs |= Attributes::READ_ONLY;
    }
    let dotted = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
    if dotted {
        attrs |= Attributes::HIDDEN;
    }
    Ok(attrs)
}

/// Every device with its disks.
pub fn scan(catalog: &Catalog) -> CliResult<()> {
    for device in catalog.list("")? {
        println!("{}", device.name);
        for disk in catalog.list(&device.name)? {
            let mounted = catalog.disk(disk.id)?;
            println!(
                "  {}: start {:#X}, {} KiB, {} KiB free, {} entries free",
                disk.name,
                mounted.partition.start,
                disk.size / 1024,
                disk.free.unwrap_or(0) / 1024,
                mounted.disk.free_entries()
            );
        }
    }
    Ok(())
}

/// Disk summaries of a device or a single disk.
pub fn info(catalog: &Catalog, path: &str) -> CliResult<()> {
    let id = catalog.resolve(path)?;
    let disks = match catalog.kind(id)? {
        NodeKind::Disk { .. } => vec![id],
        NodeKind::Root => catalog
            .children(id)
            .iter()
            .flat_map(|&d| catalog.children(d).to_vec())
            .collect(),
        NodeKind::Device { .. } => catalog.children(id).to_vec(),
        _ => return Err(format!("{path} is not a device or disk").into()),
    };
    for disk in disks {
        let mounted = catalog.disk(disk)?;
        let summary = DiskSummary::from_dpb(mounted.partition.start, mounted.disk.dpb());
        println!("{}\n{}\n", catalog.path_of(disk), summary);
    }
    Ok(())
}

pub fn ls(catalog: &Catalog, path: &str, long: bool) -> CliResult<()> {
    for entry in catalog.list(path)? {
        match entry.kind {
            EntryKind::File if long => println!(
                "{:<12} {:>9} {}",
                entry.name,
                entry.size,
                attr_flags(entry.attributes)
            ),
            EntryKind::Disk if long => println!(
                "{:<12} {:>9} KiB, {} KiB free",
                entry.name,
                entry.size / 1024,
                entry.free.unwrap_or(0) / 1024
            ),
            EntryKind::User if long => {
                let count = catalog.children(entry.id).len();
                println!("{:<12} {:>9} files", entry.name, count)
            }
            _ => println!("{}", entry.name),
        }
    }
    Ok(())
}

/// Copy a file out to the host. `dest` may be a directory.
pub fn get(
    catalog: &mut Catalog,
    src: &str,
    dest: &Path,
    mode: HostWrite,
    move_file: bool,
) -> CliResult<()> {
    let id = catalog.resolve(src)?;
    let name = catalog.name(id)?.to_string();
    let attrs = catalog.info(id)?.attributes;
    let data = catalog.read_file(src)?;

    let target = if dest.is_dir() {
        dest.join(&name)
    } else {
        dest.to_path_buf()
    };
    match (target.exists(), mode) {
        (true, HostWrite::Fail) => {
            return Err(format!(
                "{} exists, use --overwrite or --resume",
                target.display()
            )
            .into())
        }
        (true, HostWrite::Resume) => {
            let have = fs::metadata(&target)?.len() as usize;
            if have > data.len() {
                return Err(format!(
                    "{} is longer than {} ({} > {} bytes)",
                    target.display(),
                    src,
                    have,
                    data.len()
                )
                .into());
            }
            let mut file = OpenOptions::new().append(true).open(&target)?;
            file.write_all(&data[have..])?;
            info!("{}: resumed at {} of {} bytes", target.display(), have, data.len());
        }
        _ => {
            fs::write(&target, &data)?;
            info!("{} -> {} ({} bytes)", src, target.display(), data.len());
        }
    }

    if attrs.contains(Attributes::READ_ONLY) {
        let mut perms = fs::metadata(&target)?.permissions();
        perms.set_readonly(true);
        fs::set_permissions(&target, perms)?;
    }
    if move_file {
        catalog.delete_file(src)?;
    }
    Ok(())
}

/// Copy a host file into the user area at `dir`.
pub fn put(
    catalog: &mut Catalog,
    src: &Path,
    dir: &str,
    name: Option<&str>,
    mode: PutMode,
) -> CliResult<()> {
    let data = fs::read(src)?;
    let attrs = host_attributes(src)?;
    let name = match name {
        Some(name) => name.to_string(),
        None => src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| format!("{} has no file name", src.display()))?,
    };
    let id = catalog.write_file(dir, &name, &data, attrs, mode)?;
    info!("{} -> {} ({} bytes)", src.display(), catalog.path_of(id), data.len());
    Ok(())
}

pub fn rm(catalog: &mut Catalog, path: &str) -> CliResult<()> {
    catalog.delete_file(path)?;
    info!("deleted {}", path);
    Ok(())
}

/// Copy or move a file between user areas, disks or devices.
pub fn transfer(
    catalog: &mut Catalog,
    from: &str,
    to_dir: &str,
    name: Option<&str>,
    overwrite: bool,
    mode: Transfer,
) -> CliResult<()> {
    let id = catalog.transfer(from, to_dir, name, mode, overwrite)?;
    info!("{} -> {}", from, catalog.path_of(id));
    Ok(())
}
