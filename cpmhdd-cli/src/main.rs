//! cpmhdd - Copy, format and browse CP/M partitions on hard disks and images.
//!
//! Usage:
//!   cpmhdd [-i image]... <command> [args]
//!
//! Examples:
//!   cpmhdd -i hdd.img scan                       # List devices and disks
//!   cpmhdd -i hdd.img ls hdd.img/A/user00 -l     # List a user area
//!   cpmhdd put STAT.COM hdd.img/A/user00         # Copy a host file in
//!   cpmhdd get hdd.img/A/user00/STAT.COM .       # Copy it back out
//!   cpmhdd copy hdd.img B cpm22.zip -r           # Copy an archive to disk B:
//!   cpmhdd format hdd.img -a 256 -d 4            # Format DOS partitions
//!   cpmhdd config add-image hdd.img              # Mount hdd.img by default

mod copy;
mod formatter;
mod logger;
mod ops;
mod prompt;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::{error, info, warn, LevelFilter};

use cpmhdd_core::config::SETTINGS_FILE;
use cpmhdd_core::{
    scan_device, BlockSizing, Catalog, CpmResult, ImageDevice, PutMode, ScannedDevice, Settings,
    Transfer,
};

pub type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// CP/M hard-disk partition tool
#[derive(Parser, Debug)]
#[command(name = "cpmhdd")]
#[command(about = "Copy, format and browse CP/M partitions on hard disks and images")]
struct Args {
    /// Settings file
    #[arg(long, global = true, default_value = SETTINGS_FILE)]
    config: PathBuf,

    /// Image or device to mount instead of the configured ones
    #[arg(short = 'i', long = "image", global = true)]
    images: Vec<PathBuf>,

    /// Debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List mounted devices and their CP/M disks
    Scan,
    /// Show disk parameters of a device or disk
    Info {
        #[arg(default_value = "")]
        path: String,
    },
    /// List a device, disk or user area
    Ls {
        #[arg(default_value = "")]
        path: String,
        /// Show sizes and attributes
        #[arg(short, long)]
        long: bool,
    },
    /// Copy a CP/M file to the host
    Get {
        src: String,
        dest: PathBuf,
        /// Replace an existing host file
        #[arg(long, conflicts_with = "resume")]
        overwrite: bool,
        /// Append what is missing to an existing host file
        #[arg(long)]
        resume: bool,
        /// Delete the CP/M file afterwards
        #[arg(long = "move")]
        move_file: bool,
    },
    /// Copy a host file into a user area
    Put {
        src: PathBuf,
        dir: String,
        /// CP/M name to store the file under
        #[arg(long)]
        name: Option<String>,
        /// Replace an existing file
        #[arg(long, conflicts_with = "resume")]
        overwrite: bool,
        /// Append to an existing file
        #[arg(long)]
        resume: bool,
    },
    /// Delete a CP/M file
    Rm { path: String },
    /// Move a file to another user area, disk or device
    Mv {
        from: String,
        to: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        overwrite: bool,
    },
    /// Copy a file to another user area, disk or device
    Cp {
        from: String,
        to: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        overwrite: bool,
    },
    /// Copy host files or ZIP archives into one disk of a device
    Copy {
        device: PathBuf,
        /// Disk letter, e.g. `A` or `B:`
        drive: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// User area for files not under a userNN/ directory
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=15))]
        user: u8,
        /// Overwrite existing files without asking
        #[arg(short = 'r', long)]
        replace: bool,
    },
    /// Format, unformat or inspect the logical partitions of a device
    Format {
        device: PathBuf,
        /// Target allocation vector size in bytes (128..=512)
        #[arg(short = 'a', long)]
        alv: Option<u32>,
        /// Fixed block size (1024..=16384)
        #[arg(short = 'c', long, conflicts_with = "alv")]
        block_size: Option<u32>,
        /// Directory blocks (1..=16)
        #[arg(short = 'd', long)]
        dir_blocks: Option<u32>,
        /// Reserved tracks (0..=9)
        #[arg(short = 't', long)]
        reserved_tracks: Option<u32>,
        /// Clear the whole data area
        #[arg(short = 'u', long)]
        full_clear: bool,
        /// Format every DOS partition without asking
        #[arg(long)]
        yes: bool,
    },
    /// Show or edit the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show,
    AddImage { path: PathBuf },
    RemoveImage { path: PathBuf },
}

impl Command {
    fn writes(&self) -> bool {
        matches!(
            self,
            Command::Get {
                move_file: true,
                ..
            } | Command::Put { .. }
                | Command::Rm { .. }
                | Command::Mv { .. }
                | Command::Cp { .. }
        )
    }
}

fn put_mode(overwrite: bool, resume: bool) -> PutMode {
    if resume {
        PutMode::Resume
    } else if overwrite {
        PutMode::Overwrite
    } else {
        PutMode::CreateNew
    }
}

/// Scan every source on its own blocking worker and collect the results.
async fn mount_all(sources: Vec<PathBuf>, writable: bool) -> CliResult<Catalog> {
    let scans: Vec<_> = sources
        .into_iter()
        .map(|path| {
            let label = copy::device_label(&path);
            let name = label.clone();
            let handle = tokio::task::spawn_blocking(move || -> CpmResult<ScannedDevice> {
                let dev = ImageDevice::open(&path, writable)?;
                scan_device(&name, Box::new(dev))
            });
            (label, handle)
        })
        .collect();

    let mut catalog = Catalog::new();
    for (label, handle) in scans {
        match handle.await? {
            Ok(scanned) => {
                catalog.attach(scanned);
            }
            Err(e) => warn!("{}: {}", label, e),
        }
    }
    Ok(catalog)
}

async fn run(args: Args, mut settings: Settings) -> CliResult<()> {
    let sources = if args.images.is_empty() {
        settings.sources().into_iter().map(PathBuf::from).collect()
    } else {
        args.images.clone()
    };
    let writable = args.command.writes();

    match args.command {
        Command::Config { action } => {
            match action {
                ConfigAction::Show => println!("{}", settings.to_json()?),
                ConfigAction::AddImage { path } => {
                    if !settings.add_image(&path) {
                        warn!("{} is already listed", path.display());
                    }
                    settings.save(&args.config)?;
                }
                ConfigAction::RemoveImage { path } => {
                    if !settings.remove_image(&path) {
                        warn!("{} is not listed", path.display());
                    }
                    settings.save(&args.config)?;
                }
            }
            Ok(())
        }
        Command::Format {
            device,
            alv,
            block_size,
            dir_blocks,
            reserved_tracks,
            full_clear,
            yes,
        } => {
            let mut params = settings.format;
            if let Some(alv) = alv {
                params.sizing = BlockSizing::AllocVector(alv);
            }
            if let Some(size) = block_size {
                params.sizing = BlockSizing::Fixed(size);
            }
            params.dir_blocks = dir_blocks.unwrap_or(params.dir_blocks);
            params.reserved_tracks = reserved_tracks.unwrap_or(params.reserved_tracks);
            params.full_clear |= full_clear;
            tokio::task::spawn_blocking(move || formatter::run(&device, &params, yes)).await??;
            Ok(())
        }
        Command::Copy {
            device,
            drive,
            files,
            user,
            replace,
        } => {
            let label = copy::device_label(&device);
            let drive = drive.trim_end_matches(':').to_ascii_uppercase();
            let copied = tokio::task::spawn_blocking(move || -> CliResult<usize> {
                let mut catalog = Catalog::new();
                let dev = ImageDevice::open(&device, true)?;
                catalog.mount(&label, Box::new(dev))?;
                copy::run(&mut catalog, &label, &drive, user, &files, replace)
            })
            .await??;
            info!("{} file(s) copied", copied);
            Ok(())
        }
        command => {
            if sources.is_empty() {
                return Err("no images configured, use -i or `config add-image`".into());
            }
            let mut catalog = mount_all(sources, writable).await?;
            tokio::task::spawn_blocking(move || dispatch(&mut catalog, command)).await?
        }
    }
}

fn dispatch(catalog: &mut Catalog, command: Command) -> CliResult<()> {
    match command {
        Command::Scan => ops::scan(catalog),
        Command::Info { path } => ops::info(catalog, &path),
        Command::Ls { path, long } => ops::ls(catalog, &path, long),
        Command::Get {
            src,
            dest,
            overwrite,
            resume,
            move_file,
        } => {
            let mode = if resume {
                ops::HostWrite::Resume
            } else if overwrite {
                ops::HostWrite::Overwrite
            } else {
                ops::HostWrite::Fail
            };
            ops::get(catalog, &src, &dest, mode, move_file)
        }
        Command::Put {
            src,
            dir,
            name,
            overwrite,
            resume,
        } => ops::put(catalog, &src, &dir, name.as_deref(), put_mode(overwrite, resume)),
        Command::Rm { path } => ops::rm(catalog, &path),
        Command::Mv {
            from,
            to,
            name,
            overwrite,
        } => ops::transfer(catalog, &from, &to, name.as_deref(), overwrite, Transfer::Move),
        Command::Cp {
            from,
            to,
            name,
            overwrite,
        } => ops::transfer(catalog, &from, &to, name.as_deref(), overwrite, Transfer::Copy),
        Command::Config { .. } | Command::Format { .. } | Command::Copy { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let args = Args::parse();
    let settings = Settings::load_or_create(&args.config)?;

    let level = if args.verbose {
        LevelFilter::Debug
    } else if args.quiet {
        LevelFilter::Error
    } else {
        LevelFilter::Info
    };
    logger::init(
        level,
        settings.log_enabled.then_some(settings.log_file.as_path()),
    );

    let result = run(args, settings).await;
    if let Err(e) = &result {
        error!("{}", e);
    }
    logger::shutdown();
    if result.is_err() {
        std::process::exit(1);
    }
    Ok(())
}
