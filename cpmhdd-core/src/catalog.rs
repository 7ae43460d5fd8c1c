//! Catalog tree: devices, their CP/M disks, user areas and files.
//!
//! Nodes live in an arena and are addressed by stable `NodeId`s. Each node
//! knows its parent and its children, so "which disk holds this file" is an
//! upward walk over indices. Every mutating operation updates the disk first
//! and then mirrors the result in the tree.
//!
//! Paths look like `image.img/A/user00/README.TXT`; segments are separated by
//! `/` or `\` and matched case-insensitively.

use log::{debug, info, warn};

use crate::device::BlockDevice;
use crate::dir::{Attributes, CpmName, MAX_USER};
use crate::disk::{FileInfo, LogicalDisk};
use crate::error::{CpmError, CpmResult};
use crate::partition::{walk, LogicalPartition};

/// Index of a node in the catalog arena.
pub type NodeId = usize;

/// What a node represents.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root,
    Device { slot: usize },
    Disk { slot: usize, disk: usize },
    User(u8),
    File(FileInfo),
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Kind of a listed node, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Device,
    Disk,
    User,
    File,
}

/// What `list` and `info` report about a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    pub kind: EntryKind,
    /// File size, or disk capacity for disks.
    pub size: u64,
    /// Free bytes on the containing disk (disks only).
    pub free: Option<u64>,
    pub attributes: Attributes,
}

/// How `write_file` treats an existing file of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PutMode {
    /// Fail with `FileExists`.
    #[default]
    CreateNew,
    /// Replace the existing file.
    Overwrite,
    /// Append to the existing file, keeping its attributes.
    Resume,
}

/// Copy or move for `transfer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Copy,
    Move,
}

/// A CP/M disk found on a device.
pub struct MountedDisk {
    pub partition: LogicalPartition,
    pub disk: LogicalDisk,
}

struct MountedDevice {
    dev: Box<dyn BlockDevice>,
    disks: Vec<MountedDisk>,
}

/// Result of scanning one device, ready to be attached to a catalog.
///
/// Scanning only needs the device, so independent devices can be scanned
/// on separate threads and attached afterwards.
pub struct ScannedDevice {
    pub label: String,
    dev: Box<dyn BlockDevice>,
    disks: Vec<(MountedDisk, Vec<FileInfo>)>,
}

impl ScannedDevice {
    pub fn disk_count(&self) -> usize {
        self.disks.len()
    }
}

/// Walk the partition chains of `dev` and mount every CP/M partition.
///
/// Partitions that fail to mount are logged and skipped.
pub fn scan_device(label: &str, mut dev: Box<dyn BlockDevice>) -> CpmResult<ScannedDevice> {
    let mut disks = Vec::new();
    for partition in walk(dev.as_mut())? {
        if !partition.is_cpm() {
            debug!(
                "{}: skip partition type {:#04X} at {:#X}",
                label, partition.kind, partition.start
            );
            continue;
        }
        match LogicalDisk::mount(dev.as_mut(), partition.start) {
            Ok((disk, files)) => disks.push((MountedDisk { partition, disk }, files)),
            Err(e) => warn!("{}: skip disk at {:#X}: {}", label, partition.start, e),
        }
    }
    info!("{}: {} CP/M disk(s)", label, disks.len());
    Ok(ScannedDevice {
        label: label.to_string(),
        dev,
        disks,
    })
}

/// Name of a user-area node; upper-case when the area holds files.
pub fn user_area_name(user: u8, empty: bool) -> String {
    if empty {
        format!("user{user:02}")
    } else {
        format!("USER{user:02}")
    }
}

/// Letter of the `index`-th CP/M disk of a device: `A`..`Z`, then `AA`, `AB`...
pub fn disk_letter(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        n -= 1;
        letters.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    letters.iter().rev().map(|&c| c as char).collect()
}

/// Tree of everything mounted.
pub struct Catalog {
    nodes: Vec<Option<Node>>,
    /// Removed node slots, reused by `insert`.
    free: Vec<NodeId>,
    devices: Vec<Option<MountedDevice>>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub const ROOT: NodeId = 0;

    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node {
                name: String::new(),
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
            })],
            free: Vec::new(),
            devices: Vec::new(),
        }
    }

    /// Scan a device and add it to the tree.
    pub fn mount(&mut self, label: &str, dev: Box<dyn BlockDevice>) -> CpmResult<NodeId> {
        Ok(self.attach(scan_device(label, dev)?))
    }

    /// Add a scanned device with its disks, user areas and files.
    pub fn attach(&mut self, scanned: ScannedDevice) -> NodeId {
        let slot = self.devices.len();
        let label = self.unique_device_name(&scanned.label);
        let device_id = self.insert(Self::ROOT, label, NodeKind::Device { slot });

        let mut disks = Vec::with_capacity(scanned.disks.len());
        for (index, (mounted, files)) in scanned.disks.into_iter().enumerate() {
            let disk_id = self.insert(
                device_id,
                disk_letter(index),
                NodeKind::Disk { slot, disk: index },
            );
            self.populate_disk(disk_id, files);
            disks.push(mounted);
        }
        self.devices.push(Some(MountedDevice {
            dev: scanned.dev,
            disks,
        }));
        device_id
    }

    /// Remove a device and everything below it, handing back its block device.
    pub fn detach(&mut self, device: NodeId) -> CpmResult<Box<dyn BlockDevice>> {
        let slot = match self.kind(device)? {
            NodeKind::Device { slot } => *slot,
            _ => return Err(CpmError::InvalidPath(self.path_of(device))),
        };
        self.remove_subtree(device);
        let mut mounted = self.devices[slot]
            .take()
            .ok_or_else(|| CpmError::PathNotFound(slot.to_string()))?;
        mounted.dev.flush()?;
        Ok(mounted.dev)
    }

    fn unique_device_name(&self, label: &str) -> String {
        let mut name = label.to_string();
        let mut n = 1;
        while self.find_child(Self::ROOT, &name).is_some() {
            n += 1;
            name = format!("{label}#{n}");
        }
        name
    }

    fn populate_disk(&mut self, disk_id: NodeId, files: Vec<FileInfo>) {
        let users: Vec<NodeId> = (0..=MAX_USER)
            .map(|user| self.insert(disk_id, user_area_name(user, true), NodeKind::User(user)))
            .collect();
        for file in files {
            let user_id = users[file.user as usize];
            self.insert(user_id, file.name.to_string(), NodeKind::File(file));
        }
        for user_id in users {
            self.refresh_user_name(user_id);
        }
    }

    fn insert(&mut self, parent: NodeId, name: String, kind: NodeKind) -> NodeId {
        let node = Some(Node {
            name,
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        if let Some(Some(p)) = self.nodes.get_mut(parent) {
            p.children.push(id);
        }
        id
    }

    fn remove_subtree(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id).and_then(Option::take) else {
            return;
        };
        self.free.push(id);
        if let Some(Some(parent)) = node.parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|&c| c != id);
        }
        for child in node.children {
            self.remove_subtree(child);
        }
    }

    fn node(&self, id: NodeId) -> CpmResult<&Node> {
        self.nodes
            .get(id)
            .and_then(Option::as_ref)
            .ok_or_else(|| CpmError::PathNotFound(format!("#{id}")))
    }

    fn node_mut(&mut self, id: NodeId) -> CpmResult<&mut Node> {
        self.nodes
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| CpmError::PathNotFound(format!("#{id}")))
    }

    /// Payload of a node.
    pub fn kind(&self, id: NodeId) -> CpmResult<&NodeKind> {
        Ok(&self.node(id)?.kind)
    }

    pub fn name(&self, id: NodeId) -> CpmResult<&str> {
        Ok(&self.node(id)?.name)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).ok().and_then(|n| n.parent)
    }

    /// Children of a node, in insertion order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children(parent).iter().copied().find(|&c| {
            self.node(c)
                .map(|n| n.name.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
    }

    /// Resolve a path to a node.
    pub fn resolve(&self, path: &str) -> CpmResult<NodeId> {
        path.split(['/', '\\'])
            .filter(|s| !s.is_empty())
            .try_fold(Self::ROOT, |id, segment| {
                self.find_child(id, segment)
                    .ok_or_else(|| CpmError::PathNotFound(path.to_string()))
            })
    }

    /// Full path of a node.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            match self.node(c) {
                Ok(node) if node.parent.is_some() => {
                    parts.push(node.name.clone());
                    current = node.parent;
                }
                _ => break,
            }
        }
        parts.reverse();
        parts.join("/")
    }

    /// Nearest node at or above `id` whose kind satisfies `pred`.
    fn ancestor(&self, id: NodeId, pred: impl Fn(&NodeKind) -> bool) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(c) = current {
            let node = self.node(c).ok()?;
            if pred(&node.kind) {
                return Some(c);
            }
            current = node.parent;
        }
        None
    }

    /// Device slot and disk index of the disk holding `id`.
    fn disk_of(&self, id: NodeId) -> CpmResult<(NodeId, usize, usize)> {
        let disk_id = self
            .ancestor(id, |k| matches!(k, NodeKind::Disk { .. }))
            .ok_or_else(|| CpmError::InvalidPath(self.path_of(id)))?;
        match self.kind(disk_id)? {
            NodeKind::Disk { slot, disk } => Ok((disk_id, *slot, *disk)),
            _ => Err(CpmError::InvalidPath(self.path_of(id))),
        }
    }

    fn user_of(&self, id: NodeId) -> CpmResult<(NodeId, u8)> {
        let user_id = self
            .ancestor(id, |k| matches!(k, NodeKind::User(_)))
            .ok_or_else(|| CpmError::InvalidPath(self.path_of(id)))?;
        match self.kind(user_id)? {
            NodeKind::User(user) => Ok((user_id, *user)),
            _ => Err(CpmError::InvalidPath(self.path_of(id))),
        }
    }

    fn file_of(&self, id: NodeId) -> CpmResult<&FileInfo> {
        match self.kind(id)? {
            NodeKind::File(info) => Ok(info),
            _ => Err(CpmError::FileNotFound(self.path_of(id))),
        }
    }

    /// Borrow the block device and mounted disk at a device slot.
    fn mounted(
        &mut self,
        slot: usize,
        disk: usize,
    ) -> CpmResult<(&mut dyn BlockDevice, &mut MountedDisk)> {
        let device = self
            .devices
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or_else(|| CpmError::PathNotFound(format!("device {slot}")))?;
        let mounted = device
            .disks
            .get_mut(disk)
            .ok_or_else(|| CpmError::PathNotFound(format!("disk {disk}")))?;
        Ok((device.dev.as_mut(), mounted))
    }

    /// Mounted disk holding a node.
    pub fn disk(&self, id: NodeId) -> CpmResult<&MountedDisk> {
        let (_, slot, disk) = self.disk_of(id)?;
        self.devices
            .get(slot)
            .and_then(Option::as_ref)
            .and_then(|d| d.disks.get(disk))
            .ok_or_else(|| CpmError::PathNotFound(self.path_of(id)))
    }

    /// Describe one node.
    pub fn info(&self, id: NodeId) -> CpmResult<NodeInfo> {
        let node = self.node(id)?;
        let mut info = NodeInfo {
            id,
            name: node.name.clone(),
            kind: EntryKind::Device,
            size: 0,
            free: None,
            attributes: Attributes::empty(),
        };
        match &node.kind {
            NodeKind::Root | NodeKind::Device { .. } => {}
            NodeKind::Disk { .. } => {
                let disk = &self.disk(id)?.disk;
                let g = disk.geometry();
                info.kind = EntryKind::Disk;
                info.size = g.block_count as u64 * g.block_size as u64;
                info.free = Some(disk.free_bytes());
            }
            NodeKind::User(_) => info.kind = EntryKind::User,
            NodeKind::File(file) => {
                info.kind = EntryKind::File;
                info.size = file.size;
                info.attributes = file.attributes;
            }
        }
        Ok(info)
    }

    /// List the children of the node at `path`.
    pub fn list(&self, path: &str) -> CpmResult<Vec<NodeInfo>> {
        let id = self.resolve(path)?;
        self.children(id).iter().map(|&c| self.info(c)).collect()
    }

    /// Read the file at `path`.
    pub fn read_file(&mut self, path: &str) -> CpmResult<Vec<u8>> {
        let id = self.resolve(path)?;
        self.read_node(id)
    }

    fn read_node(&mut self, id: NodeId) -> CpmResult<Vec<u8>> {
        let name = self.file_of(id)?.name;
        let (_, user) = self.user_of(id)?;
        let (_, slot, disk) = self.disk_of(id)?;
        let (dev, mounted) = self.mounted(slot, disk)?;
        mounted.disk.read_file(dev, user, &name)
    }

    /// Write `data` as `filename` into the user area at `dir`.
    pub fn write_file(
        &mut self,
        dir: &str,
        filename: &str,
        data: &[u8],
        attrs: Attributes,
        mode: PutMode,
    ) -> CpmResult<NodeId> {
        let user_id = self.resolve(dir)?;
        self.write_node(user_id, &CpmName::encode(filename), data, attrs, mode)
    }

    fn write_node(
        &mut self,
        user_id: NodeId,
        name: &CpmName,
        data: &[u8],
        attrs: Attributes,
        mode: PutMode,
    ) -> CpmResult<NodeId> {
        let user = match self.kind(user_id)? {
            NodeKind::User(user) => *user,
            _ => return Err(CpmError::InvalidPath(self.path_of(user_id))),
        };
        let (disk_id, slot, disk) = self.disk_of(user_id)?;
        let existing = self.find_child(user_id, &name.to_string());

        let (dev, mounted) = self.mounted(slot, disk)?;
        let result = match (mode, existing) {
            (PutMode::CreateNew, Some(_)) => Err(CpmError::FileExists(name.to_string())),
            (_, None) => {
                mounted.disk.write_file(dev, user, name, data, attrs)
            }
            (PutMode::Overwrite, Some(_)) => {
                mounted.disk.replace_file(dev, user, name, data, attrs)
            }
            (PutMode::Resume, Some(_)) => {
                let old = mounted.disk.stat(dev, user, name)?;
                let mut combined = mounted.disk.read_file(dev, user, name)?;
                combined.extend_from_slice(data);
                mounted
                    .disk
                    .replace_file(dev, user, name, &combined, old.attributes)
            }
        };

        match result {
            Ok(info) => {
                if let Some(old) = existing {
                    self.remove_subtree(old);
                }
                let id = self.insert(user_id, name.to_string(), NodeKind::File(info));
                self.refresh_user_name(user_id);
                Ok(id)
            }
            Err(e @ (CpmError::SectorRead { .. } | CpmError::SectorWrite { .. })) => {
                warn!("{}: {}, rescanning disk", self.path_of(user_id), e);
                self.refresh_disk(disk_id)?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete the file at `path`.
    pub fn delete_file(&mut self, path: &str) -> CpmResult<()> {
        let id = self.resolve(path)?;
        self.delete_node(id)
    }

    fn delete_node(&mut self, id: NodeId) -> CpmResult<()> {
        let name = self.file_of(id)?.name;
        let (user_id, user) = self.user_of(id)?;
        let (_, slot, disk) = self.disk_of(id)?;
        let (dev, mounted) = self.mounted(slot, disk)?;
        mounted.disk.delete_file(dev, user, &name)?;
        self.remove_subtree(id);
        self.refresh_user_name(user_id);
        Ok(())
    }

    /// Copy or move the file at `from` into the user area at `to_dir`.
    ///
    /// `new_name` renames the file on the way; otherwise it keeps its name.
    /// Moves within one disk rewrite the directory in place.
    pub fn transfer(
        &mut self,
        from: &str,
        to_dir: &str,
        new_name: Option<&str>,
        mode: Transfer,
        overwrite: bool,
    ) -> CpmResult<NodeId> {
        let src = self.resolve(from)?;
        let dst_user = self.resolve(to_dir)?;
        let info = self.file_of(src)?.clone();
        let target = new_name.map(CpmName::encode).unwrap_or(info.name);

        let (src_user_id, src_user) = self.user_of(src)?;
        let (_, src_slot, src_disk) = self.disk_of(src)?;
        let dst_user_num = match self.kind(dst_user)? {
            NodeKind::User(user) => *user,
            _ => return Err(CpmError::InvalidPath(to_dir.to_string())),
        };
        let (_, dst_slot, dst_disk) = self.disk_of(dst_user)?;

        if src_user_id == dst_user && target == info.name {
            return Ok(src);
        }
        let same_disk = (src_slot, src_disk) == (dst_slot, dst_disk);

        if let Some(existing) = self.find_child(dst_user, &target.to_string()) {
            if !overwrite {
                return Err(CpmError::FileExists(target.to_string()));
            }
            if same_disk && mode == Transfer::Move {
                self.delete_node(existing)?;
            }
        }

        if same_disk && mode == Transfer::Move {
            let (dev, mounted) = self.mounted(src_slot, src_disk)?;
            mounted
                .disk
                .rename_file(dev, src_user, &info.name, dst_user_num, &target)?;
            self.remove_subtree(src);
            let moved = FileInfo {
                user: dst_user_num,
                name: target,
                ..info
            };
            let id = self.insert(dst_user, target.to_string(), NodeKind::File(moved));
            self.refresh_user_name(src_user_id);
            self.refresh_user_name(dst_user);
            return Ok(id);
        }

        let data = self.read_node(src)?;
        let put = if overwrite {
            PutMode::Overwrite
        } else {
            PutMode::CreateNew
        };
        let id = self.write_node(dst_user, &target, &data, info.attributes, put)?;
        if mode == Transfer::Move {
            self.delete_node(src)?;
        }
        Ok(id)
    }

    /// Rebuild the file nodes of a disk from a fresh directory scan.
    pub fn refresh_disk(&mut self, disk_id: NodeId) -> CpmResult<()> {
        let (_, slot, disk) = self.disk_of(disk_id)?;
        let (dev, mounted) = self.mounted(slot, disk)?;
        let files = mounted.disk.rescan(dev)?;
        for user_id in self.children(disk_id).to_vec() {
            self.remove_subtree(user_id);
        }
        self.populate_disk(disk_id, files);
        Ok(())
    }

    fn refresh_user_name(&mut self, user_id: NodeId) {
        let empty = self.children(user_id).is_empty();
        if let Ok(node) = self.node_mut(user_id) {
            if let NodeKind::User(user) = node.kind {
                node.name = user_area_name(user, empty);
            }
        }
    }
}
