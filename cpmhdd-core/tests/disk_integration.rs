//! Integration tests driving whole partitioned images through the public API.

use std::io::{Cursor, Write};

use cpmhdd_core::partition::{set_boot_signature, CPM_KIND};
use cpmhdd_core::{
    format, load_archive, synthesize, walk, Attributes, BlockDevice, BlockSizing, Catalog,
    CpmError, CpmName, DiskSummary, FormatParams, ImageDevice, LogicalDisk, MemoryDevice,
    PartitionRecord, PutMode, SECTOR_SIZE,
};

/// Image with one extended partition starting at sector 63, chaining
/// `sizes.len()` logical partitions of the given sizes and kinds.
fn partitioned_image(parts: &[(u8, u64)]) -> MemoryDevice {
    let base = 63u64;
    let total: u64 = parts.iter().map(|(_, size)| size + 1).sum();
    let mut dev = MemoryDevice::new(base + total);

    let mut mbr = [0u8; SECTOR_SIZE];
    PartitionRecord {
        active: 0x80,
        kind: 0x06,
        relative_start: 1,
        size: 62,
        ..Default::default()
    }
    .write_to(&mut mbr, 0);
    PartitionRecord {
        kind: 0x0F,
        relative_start: base as u32,
        size: total as u32,
        ..Default::default()
    }
    .write_to(&mut mbr, 1);
    set_boot_signature(&mut mbr);
    dev.write(0, &mbr).unwrap();

    let mut link = base;
    for (i, &(kind, size)) in parts.iter().enumerate() {
        let mut smbr = [0u8; SECTOR_SIZE];
        PartitionRecord {
            kind,
            relative_start: 1,
            size: size as u32,
            ..Default::default()
        }
        .write_to(&mut smbr, 0);
        let next = link + size + 1;
        if i + 1 < parts.len() {
            PartitionRecord {
                kind: 0x05,
                relative_start: (next - base) as u32,
                size: (parts[i + 1].1 + 1) as u32,
                ..Default::default()
            }
            .write_to(&mut smbr, 1);
        }
        set_boot_signature(&mut smbr);
        dev.write(link, &smbr).unwrap();
        link = next;
    }
    dev
}

fn formatted_image(parts: &[(u8, u64)], params: &FormatParams) -> MemoryDevice {
    let mut dev = partitioned_image(parts);
    for part in walk(&mut dev).unwrap() {
        if part.is_cpm() {
            format(&mut dev, part.start, part.size, params).unwrap();
        }
    }
    dev
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) ^ (i >> 9) as u8)
        .collect()
}

/// Every block referenced by a live entry is occupied, and the directory
/// region is never free.
fn assert_maps_consistent(dev: &mut MemoryDevice, disk: &LogicalDisk, files: &[cpmhdd_core::FileInfo]) {
    let geometry = *disk.geometry();
    for block in 0..geometry.dir_blocks as usize {
        assert!(disk.maps().blocks.is_used(block));
    }
    for file in files {
        for (slot, entry) in disk.find_entries(dev, file.user, &file.name).unwrap() {
            assert!(disk.maps().dirs.is_used(slot));
            for block in entry.blocks() {
                assert!(disk.maps().blocks.is_used(block as usize), "block {block}");
            }
        }
    }
}

#[test]
fn test_synthesize_format_mount_round_trip() {
    let cases = [
        (4096u64, FormatParams::default()),
        (
            20_000,
            FormatParams {
                sizing: BlockSizing::Fixed(4096),
                dir_blocks: 4,
                reserved_tracks: 0,
                full_clear: false,
            },
        ),
        (
            65_536,
            FormatParams {
                sizing: BlockSizing::AllocVector(256),
                reserved_tracks: 9,
                ..Default::default()
            },
        ),
    ];

    for (sectors, params) in cases {
        let dpb = synthesize(sectors, &params).unwrap();
        let mut dev = MemoryDevice::new(sectors + 8);
        format(&mut dev, 8, sectors, &params).unwrap();

        let (disk, files) = LogicalDisk::mount(&mut dev, 8).unwrap();
        assert!(files.is_empty());
        let g = disk.geometry();
        assert_eq!(g.block_size, dpb.block_size());
        assert_eq!(g.block_count, dpb.block_count());
        assert_eq!(g.dir_entries, dpb.dir_entries());
        assert!(g.end_sector() <= 8 + sectors);
        assert!(!DiskSummary::from_dpb(8, &dpb).directory_too_small());
    }
}

#[test]
fn test_write_read_sizes_across_extents() {
    let mut dev = formatted_image(&[(CPM_KIND, 8192)], &FormatParams::default());
    let part = walk(&mut dev).unwrap()[0];
    let (mut disk, _) = LogicalDisk::mount(&mut dev, part.start).unwrap();
    let block = disk.geometry().block_size as usize;

    let sizes = [0, 1, 127, 128, block, block + 1, 16384, 16385, 3 * 16384 + 700, 100_000];
    for (i, &size) in sizes.iter().enumerate() {
        let name = CpmName::encode(&format!("FILE{i}.BIN"));
        let data = pattern(size, i as u8);
        let info = disk
            .write_file(&mut dev, (i % 16) as u8, &name, &data, Attributes::empty())
            .unwrap();
        assert_eq!(info.size, size as u64);
        assert_eq!(disk.read_file(&mut dev, (i % 16) as u8, &name).unwrap(), data, "size {size}");
    }

    // A fresh mount sees the same files with exact sizes
    let (remounted, files) = LogicalDisk::mount(&mut dev, part.start).unwrap();
    assert_eq!(files.len(), sizes.len());
    for (i, &size) in sizes.iter().enumerate() {
        let file = files
            .iter()
            .find(|f| f.name.to_string() == format!("FILE{i}.BIN"))
            .unwrap();
        assert_eq!(file.size, size as u64);
        assert_eq!(file.user, (i % 16) as u8);
    }
    assert_eq!(remounted.maps(), disk.maps());
    assert_maps_consistent(&mut dev, &remounted, &files);
}

#[test]
fn test_delete_restores_maps() {
    let mut dev = formatted_image(&[(CPM_KIND, 4096)], &FormatParams::default());
    let part = walk(&mut dev).unwrap()[0];
    let (mut disk, _) = LogicalDisk::mount(&mut dev, part.start).unwrap();
    let keep = CpmName::encode("KEEP.TXT");
    disk.write_file(&mut dev, 0, &keep, b"keep", Attributes::empty())
        .unwrap();
    let before = disk.maps().clone();

    let name = CpmName::encode("TEMP.$$$");
    disk.write_file(&mut dev, 0, &name, &pattern(70_000, 9), Attributes::empty())
        .unwrap();
    disk.delete_file(&mut dev, 0, &name).unwrap();

    assert!(!disk.exists(&mut dev, 0, &name).unwrap());
    assert!(disk.exists(&mut dev, 0, &keep).unwrap());
    assert_eq!(disk.maps(), &before);

    let (_, files) = LogicalDisk::mount(&mut dev, part.start).unwrap();
    assert_eq!(files.len(), 1);
}

#[test]
fn test_directory_full() {
    let params = FormatParams {
        sizing: BlockSizing::Fixed(1024),
        dir_blocks: 1,
        ..Default::default()
    };
    // 200 sectors: small enough that one directory block is not corrected
    let mut dev = MemoryDevice::new(200);
    let dpb = format(&mut dev, 0, 200, &params).unwrap();
    assert_eq!(dpb.dir_entries(), 32);

    let (mut disk, _) = LogicalDisk::mount(&mut dev, 0).unwrap();
    for i in 0..32 {
        disk.write_file(&mut dev, 0, &CpmName::encode(&format!("F{i}")), &[], Attributes::empty())
            .unwrap();
    }
    let before = disk.maps().clone();
    assert!(matches!(
        disk.write_file(&mut dev, 0, &CpmName::encode("ONEMORE"), b"x", Attributes::empty()),
        Err(CpmError::DirectoryFull)
    ));
    assert_eq!(disk.maps(), &before);
}

#[test]
fn test_catalog_over_mixed_partitions() {
    let dev = formatted_image(
        &[(CPM_KIND, 4096), (0x06, 2048), (CPM_KIND, 4096)],
        &FormatParams::default(),
    );
    let mut catalog = Catalog::new();
    catalog.mount("disk.img", Box::new(dev)).unwrap();

    let disks = catalog.list("disk.img").unwrap();
    assert_eq!(disks.len(), 2);

    catalog
        .write_file("disk.img/B/user04", "prog.com", &pattern(5000, 1), Attributes::READ_ONLY, PutMode::CreateNew)
        .unwrap();
    let listed = catalog.list("disk.img/B/USER04").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "PROG.COM");
    assert_eq!(listed[0].size, 5000);
    assert!(listed[0].attributes.contains(Attributes::READ_ONLY));

    // Detach and rescan the same bytes: the file is still there
    let device = catalog.resolve("disk.img").unwrap();
    let dev = catalog.detach(device).unwrap();
    let mut catalog = Catalog::new();
    catalog.mount("disk.img", dev).unwrap();
    assert_eq!(
        catalog.read_file("disk.img/b/user04/prog.com").unwrap(),
        pattern(5000, 1)
    );
}

#[test]
fn test_corrupt_chain_keeps_earlier_disks() {
    let mut dev = formatted_image(&[(CPM_KIND, 1024); 6], &FormatParams::default());
    let parts = walk(&mut dev).unwrap();
    assert_eq!(parts.len(), 6);

    let broken = parts[2].table_sector;
    let mut smbr = dev.read(broken).unwrap();
    smbr[510] = 0;
    dev.write(broken, &smbr).unwrap();

    assert_eq!(walk(&mut dev).unwrap().len(), 2);
    let mut catalog = Catalog::new();
    catalog.mount("hdd", Box::new(dev)).unwrap();
    assert_eq!(catalog.list("hdd").unwrap().len(), 2);
}

#[test]
fn test_archive_import() {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        zip.start_file::<_, ()>("bin/STAT.COM", Default::default())
            .unwrap();
        zip.write_all(&pattern(3000, 2)).unwrap();
        zip.start_file::<_, ()>("user02/notes.txt", Default::default())
            .unwrap();
        zip.write_all(b"notes").unwrap();
        zip.finish().unwrap();
    }

    let dev = formatted_image(&[(CPM_KIND, 4096)], &FormatParams::default());
    let mut catalog = Catalog::new();
    catalog.mount("img", Box::new(dev)).unwrap();

    for file in load_archive(Cursor::new(buf)).unwrap() {
        let dir = format!("img/A/user{:02}", file.user.unwrap_or(0));
        catalog
            .write_file(&dir, &file.name, &file.data, Attributes::empty(), PutMode::CreateNew)
            .unwrap();
    }
    assert_eq!(catalog.read_file("img/A/user00/STAT.COM").unwrap(), pattern(3000, 2));
    assert_eq!(catalog.read_file("img/A/user02/NOTES.TXT").unwrap(), b"notes");
}

#[test]
fn test_image_file_persists() {
    let path = std::env::temp_dir().join(format!("cpmhdd-it-{}.img", std::process::id()));
    {
        let mut dev = ImageDevice::create(&path, 4096).unwrap();
        format(&mut dev, 0, 4096, &FormatParams::default()).unwrap();
        let (mut disk, _) = LogicalDisk::mount(&mut dev, 0).unwrap();
        disk.write_file(&mut dev, 1, &CpmName::encode("SAVED.DAT"), &pattern(9000, 3), Attributes::HIDDEN)
            .unwrap();
    }

    let mut dev = ImageDevice::open(&path, false).unwrap();
    let (disk, files) = LogicalDisk::mount(&mut dev, 0).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].attributes, Attributes::HIDDEN);
    assert_eq!(
        disk.read_file(&mut dev, 1, &CpmName::encode("saved.dat")).unwrap(),
        pattern(9000, 3)
    );
    drop(dev);
    std::fs::remove_file(&path).unwrap();
}
