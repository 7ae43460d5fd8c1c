//! `log` backend for the command line: coloured tags on stderr, plus an
//! optional append-only log file.

use std::fs::{File, OpenOptions};
use std::io::{IsTerminal, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crossterm::style::{Color, Stylize};
use log::{Level, LevelFilter, Log, Metadata, Record};

struct Logger {
    color: bool,
    file: Option<Mutex<File>>,
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Logger {
    fn write_file(&self, line: &str) {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = writeln!(file, "{line}");
            }
        }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = format!("[{}]", record.level());
        if self.color {
            let color = match record.level() {
                Level::Error => Color::Red,
                Level::Warn => Color::Yellow,
                Level::Info => Color::Green,
                Level::Debug | Level::Trace => Color::Grey,
            };
            eprintln!("{} {}", tag.as_str().with(color), record.args());
        } else {
            eprintln!("{} {}", tag, record.args());
        }
        self.write_file(&format!("{} {} {}", timestamp(), tag, record.args()));
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
    }
}

/// Install the logger. `log_file` is opened for appending when given.
pub fn init(level: LevelFilter, log_file: Option<&Path>) {
    let file = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(Mutex::new(file)),
            Err(e) => {
                eprintln!("can't open log file {}: {}", path.display(), e);
                None
            }
        }
    });
    let logger = LOGGER.get_or_init(|| Logger {
        color: std::io::stderr().is_terminal(),
        file,
    });
    logger.write_file(&format!("==== {} cpmhdd log opened ====", timestamp()));
    if log::set_logger(logger).is_ok() {
        log::set_max_level(level);
    }
    log::debug!("Logging initialized");
}

/// Write the closing banner to the log file.
pub fn shutdown() {
    if let Some(logger) = LOGGER.get() {
        logger.write_file(&format!("==== {} cpmhdd log closed ====", timestamp()));
        logger.flush();
    }
}
