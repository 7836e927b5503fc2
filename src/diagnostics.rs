//! Structured diagnostics events.
//!
//! `DiagnosticsSink` is owned by a generator instance and routes events to a
//! console destination (stderr), a file destination, both, or neither. It never
//! touches the process-wide `log` configuration. Each event is written as one
//! complete line with a single write call, so concurrent workers never
//! interleave partial lines.
//!
//! Line format:
//! `2024-05-01 12:00:00,123 [RTSP SNAP] [INFO]: Connect: rtsp://cam/stream`

use chrono::{DateTime, Local};
use log::Level;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{Result, SnapError};

pub const DEFAULT_LOG_FILE: &str = "rtsp_snap.log";

const LINE_TAG: &str = "[RTSP SNAP]";
const KIND_COUNT: usize = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Generator lifecycle: directory creation, start, stop.
    Lifecycle,
    Connect,
    Save,
    Disconnect,
    /// Session exhausted without a decodable frame.
    NoFrame,
    /// Connection, demux or decode failure.
    FetchError,
    /// Encode or filesystem failure while saving.
    WriteError,
}

impl EventKind {
    fn index(self) -> usize {
        self as usize
    }
}

/// A single diagnostics record.
#[derive(Clone, Debug)]
pub struct DiagnosticEvent {
    pub timestamp: DateTime<Local>,
    pub severity: Level,
    pub kind: EventKind,
    pub message: String,
}

impl DiagnosticEvent {
    pub fn format_line(&self) -> String {
        format!(
            "{} {} [{}]: {}\n",
            self.timestamp.format("%Y-%m-%d %H:%M:%S,%3f"),
            LINE_TAG,
            level_name(self.severity),
            self.message
        )
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

pub struct DiagnosticsSink {
    console: bool,
    file: Option<Mutex<File>>,
    file_path: Option<PathBuf>,
    counts: [AtomicU64; KIND_COUNT],
}

impl DiagnosticsSink {
    /// Builds a sink. `file` enables the file destination, appending to the
    /// given path (created if missing).
    pub fn new(console: bool, file: Option<&Path>) -> Result<Self> {
        let handle = match file {
            Some(path) => Some(Mutex::new(open_log_file(path)?)),
            None => None,
        };
        Ok(Self {
            console,
            file: handle,
            file_path: file.map(Path::to_path_buf),
            counts: Default::default(),
        })
    }

    /// Sink with no destinations. Events are counted, nothing is written.
    pub fn disabled() -> Self {
        Self {
            console: false,
            file: None,
            file_path: None,
            counts: Default::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.console || self.file.is_some()
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn emit(&self, severity: Level, kind: EventKind, message: fmt::Arguments<'_>) {
        self.counts[kind.index()].fetch_add(1, Ordering::Relaxed);
        if !self.is_enabled() {
            return;
        }

        let line = DiagnosticEvent {
            timestamp: Local::now(),
            severity,
            kind,
            message: message.to_string(),
        }
        .format_line();

        if self.console {
            let mut stderr = std::io::stderr().lock();
            let _ = stderr.write_all(line.as_bytes());
        }
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Err(e) = file.write_all(line.as_bytes()) {
                log::warn!("diagnostics file write failed: {}", e);
            }
        }
    }

    pub fn info(&self, kind: EventKind, message: fmt::Arguments<'_>) {
        self.emit(Level::Info, kind, message);
    }

    pub fn warn(&self, kind: EventKind, message: fmt::Arguments<'_>) {
        self.emit(Level::Warn, kind, message);
    }

    pub fn error(&self, kind: EventKind, message: fmt::Arguments<'_>) {
        self.emit(Level::Error, kind, message);
    }

    /// Events of `kind` emitted so far, whether or not any destination is enabled.
    pub fn count(&self, kind: EventKind) -> u64 {
        self.counts[kind.index()].load(Ordering::Relaxed)
    }
}

impl fmt::Debug for DiagnosticsSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticsSink")
            .field("console", &self.console)
            .field("file", &self.file_path)
            .finish()
    }
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            SnapError::Config(format!(
                "cannot create log directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SnapError::Config(format!("cannot open log file {}: {}", path.display(), e)))
}
