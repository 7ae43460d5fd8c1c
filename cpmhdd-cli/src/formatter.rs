//! Interactive formatter for the logical partitions of one device.

use std::path::Path;

use log::{info, warn};

use cpmhdd_core::dpb::MAX_SYSTEM_ALV;
use cpmhdd_core::partition::{dos_kind_for_size, set_partition_kind, CPM_KIND};
use cpmhdd_core::{format, walk, DiskSummary, FormatParams, ImageDevice, LogicalPartition};

use crate::{prompt, CliResult};

fn describe(index: usize, part: &LogicalPartition) -> String {
    format!(
        "Partition {} at {:#X}: type {:#04X}, {} KiB",
        index,
        part.start,
        part.kind,
        part.byte_len() / 1024
    )
}

/// Walk `path` and offer each logical partition for formatting.
///
/// DOS partitions, and CP/M-typed ones without a super sector, can be
/// formatted as CP/M; CP/M disks can be unformatted, inspected or skipped.
/// With `yes`, everything formattable is formatted and CP/M disks are left
/// alone. Returns the total allocation vector size of the CP/M disks left
/// on the device.
pub fn run(path: &Path, params: &FormatParams, yes: bool) -> CliResult<u32> {
    params.validate()?;
    let mut dev = ImageDevice::open(path, true)?;
    let parts = walk(&mut dev)?;
    if parts.is_empty() {
        warn!("{}: no logical partitions", path.display());
        return Ok(0);
    }

    let mut alv_total = 0;
    for (index, part) in parts.iter().enumerate() {
        println!("{}", describe(index, part));

        let summary = if part.is_cpm() {
            match DiskSummary::inspect(&mut dev, part.start) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!("partition {}: {}", index, e);
                    None
                }
            }
        } else if part.is_dos() {
            None
        } else {
            continue;
        };

        let Some(summary) = summary else {
            if !yes && !prompt::confirm("Format as CP/M?")? {
                continue;
            }
            let dpb = format(&mut dev, part.start, part.size, params)?;
            set_partition_kind(&mut dev, part, CPM_KIND)?;
            info!("formatted partition {} at {:#X}", index, part.start);
            let summary = DiskSummary::from_dpb(part.start, &dpb);
            println!("{summary}");
            alv_total += summary.alv_bytes;
            continue;
        };
        if yes {
            alv_total += summary.alv_bytes;
            continue;
        }
        loop {
            match prompt::choose("[U]nformat, [S]kip or [I]nspect?", &['u', 's', 'i'])? {
                Some('i') => println!("{summary}"),
                Some('u') => {
                    let kind = dos_kind_for_size(part.byte_len());
                    set_partition_kind(&mut dev, part, kind)?;
                    info!("partition {} retyped to {:#04X}", index, kind);
                    break;
                }
                _ => {
                    alv_total += summary.alv_bytes;
                    break;
                }
            }
        }
    }

    println!("Total ALV: {alv_total} of {MAX_SYSTEM_ALV} bytes");
    if alv_total > MAX_SYSTEM_ALV {
        warn!(
            "allocation vectors need {} bytes, the system budget is {}",
            alv_total, MAX_SYSTEM_ALV
        );
    }
    Ok(alv_total)
}
