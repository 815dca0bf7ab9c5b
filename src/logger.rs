//! Default pullrun logger

use std::env;
use std::fs::{File, OpenOptions};
use std::io::{stderr, Write};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;

/// Public global variables to access logger and logfile
pub static PULLRUN_LOGGER: OnceCell<PullrunLogger> = OnceCell::new();
pub static LOG_FILE: OnceCell<Option<File>> = OnceCell::new();

pub const LOG_LEVEL_ENV: &str = "PULLRUN_LOG_LEVEL";
pub const LOG_FILE_ENV: &str = "PULLRUN_LOG_FILE";
pub const LOG_FORMAT_ENV: &str = "PULLRUN_LOG_FORMAT";

/// If in debug mode, default level is debug to get maximum logging
#[cfg(debug_assertions)]
const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Debug;

/// If not in debug mode, default level is warn to get important logs
#[cfg(not(debug_assertions))]
const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Warn;

const LOG_FORMAT_TEXT: &str = "text";
const LOG_FORMAT_JSON: &str = "json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            LOG_FORMAT_TEXT => Ok(LogFormat::Text),
            LOG_FORMAT_JSON => Ok(LogFormat::Json),
            unknown => bail!("unknown log format: {}", unknown),
        }
    }
}

/// Level from `PULLRUN_LOG_LEVEL`, falling back to the build's default when it
/// is unset or unparsable.
pub fn level_from_env() -> LevelFilter {
    env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|level| LevelFilter::from_str(&level).ok())
        .unwrap_or(DEFAULT_LOG_LEVEL)
}

/// Initialize the logger from `PULLRUN_LOG_FORMAT` and `PULLRUN_LOG_FILE`.
pub fn init_from_env() -> Result<()> {
    init(
        env::var(LOG_FORMAT_ENV).ok(),
        env::var_os(LOG_FILE_ENV).map(PathBuf::from),
    )
}

/// Initialize the logger, must be called before accessing the logger.
/// Only the first call installs anything; later calls are no-ops.
pub fn init(log_format: Option<String>, log_file: Option<PathBuf>) -> Result<()> {
    let level_filter = level_from_env();
    let format = match log_format.as_deref() {
        None => LogFormat::default(),
        Some(format) => format.parse()?,
    };

    LOG_FILE.get_or_try_init(|| -> Result<Option<File>> {
        // open the file first so the logger never runs without a destination
        let file = log_file
            .as_ref()
            .map(|path| {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("failed opening log file {:?}", path))
            })
            .transpose()?;

        let logger =
            PULLRUN_LOGGER.get_or_init(|| PullrunLogger::new(level_filter.to_level(), format));
        log::set_logger(logger)
            .map(|()| log::set_max_level(level_filter))
            .context("set logger failed")?;
        Ok(file)
    })?;

    Ok(())
}

pub struct PullrunLogger {
    /// Indicates level up to which logs are to be printed
    level: Option<log::Level>,
    format: LogFormat,
}

impl PullrunLogger {
    pub fn new(level: Option<log::Level>, format: LogFormat) -> Self {
        Self { level, format }
    }

    fn format_record(&self, record: &Record, now: DateTime<Local>) -> String {
        match self.format {
            LogFormat::Text => match (record.file(), record.line()) {
                (Some(file), Some(line)) => format!(
                    "[{} {}:{}] {} {}",
                    record.level(),
                    file,
                    line,
                    now.to_rfc3339(),
                    record.args()
                ),
                (_, _) => format!("[{}] {} {}", record.level(), now.to_rfc3339(), record.args()),
            },
            LogFormat::Json => serde_json::json!({
                "level": record.level().to_string(),
                "time": now.to_rfc3339(),
                "file": record.file(),
                "line": record.line(),
                "msg": record.args().to_string(),
            })
            .to_string(),
        }
    }
}

impl Log for PullrunLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if let Some(level) = self.level {
            metadata.level() <= level
        } else {
            false
        }
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let log_msg = self.format_record(record, Local::now());

            // if log file is set, write to it, else write to stderr
            if let Some(mut log_file) = LOG_FILE.get().and_then(Option::as_ref) {
                let _ = writeln!(log_file, "{}", log_msg);
            } else {
                let _ = writeln!(stderr(), "{}", log_msg);
            }
        }
    }

    fn flush(&self) {
        if let Some(mut log_file) = LOG_FILE.get().and_then(Option::as_ref) {
            let _ = log_file.flush();
        } else {
            let _ = stderr().flush();
        }
    }
}
