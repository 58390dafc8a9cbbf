//! A leveled standard logger for the `log` facade.
//!
//! Lines carry a `[BITROUTE:<level>] ` prefix. Debug, info and warn records
//! go to stdout, errors go to stderr.

use std::io::{self, Write};

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::config::LogLevel;
use crate::error::Error;
use crate::probes::SERVICE_NAME;

/// Writes records at or above a level to the standard streams.
#[derive(Debug)]
pub struct StdLogger {
    filter: LevelFilter,
}

impl StdLogger {
    pub fn new(level: LogLevel) -> Self {
        Self {
            filter: level.filter(),
        }
    }
}

impl Log for StdLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.filter
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(record.level(), record.args());
        // a closed stream must not take the service down
        let _ = match record.level() {
            Level::Error => io::stderr().lock().write_all(line.as_bytes()),
            _ => io::stdout().lock().write_all(line.as_bytes()),
        };
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
    }
}

/// Installs [`StdLogger`] as the global logger.
///
/// # Errors
/// Fails if another logger was installed first.
pub fn init(level: LogLevel) -> Result<(), Error> {
    log::set_boxed_logger(Box::new(StdLogger::new(level)))?;
    log::set_max_level(level.filter());
    Ok(())
}

fn format_line(level: Level, args: &std::fmt::Arguments) -> String {
    let name = match level {
        Level::Error => "error",
        Level::Warn => "warn",
        Level::Info => "info",
        Level::Debug | Level::Trace => "debug",
    };
    format!("[{}:{}] {}\n", SERVICE_NAME, name, args)
}
