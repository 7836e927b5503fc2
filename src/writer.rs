//! Snapshot persistence.
//!
//! Files are named `{label}_frame_{YYYYMMDD_HHMMSS}.jpg` using the local wall
//! clock at save time. Two saves for the same label within one second resolve
//! to the same name; the later one replaces the earlier one.
//!
//! Writes go to a hidden temporary file in the output directory and are
//! renamed into place after `sync_all`, so a reader scanning the directory for
//! `*.jpg` never observes a partially written snapshot.

use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::diagnostics::{DiagnosticsSink, EventKind};
use crate::error::{Result, SnapError};
use crate::frame::Frame;
use crate::source::Source;

pub const DEFAULT_OUTPUT_DIR: &str = "./snapshots";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const SNAPSHOT_EXTENSION: &str = "jpg";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `{label}_frame_{timestamp}.jpg`
pub fn snapshot_file_name(label: &str, timestamp: &str) -> String {
    format!("{}_frame_{}.{}", label, timestamp, SNAPSHOT_EXTENSION)
}

pub fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Creates the output directory if it does not exist. Returns `true` when it
/// was created by this call.
pub fn ensure_output_dir(dir: &Path) -> Result<bool> {
    if dir.is_dir() {
        return Ok(false);
    }
    fs::create_dir_all(dir).map_err(|e| {
        SnapError::Config(format!(
            "cannot create output directory {}: {}",
            dir.display(),
            e
        ))
    })?;
    Ok(true)
}

pub struct SnapshotWriter {
    dir: PathBuf,
    jpeg_quality: u8,
    diagnostics: Arc<DiagnosticsSink>,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, jpeg_quality: u8, diagnostics: Arc<DiagnosticsSink>) -> Self {
        Self {
            dir: dir.into(),
            jpeg_quality,
            diagnostics,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Encodes and writes `frame`, stamped with the current local time.
    pub fn save(&self, frame: &Frame, source: &Source) -> Result<PathBuf> {
        self.save_at(frame, source, &Local::now())
    }

    /// Encodes and writes `frame` under the name derived from `at`.
    pub fn save_at(&self, frame: &Frame, source: &Source, at: &DateTime<Local>) -> Result<PathBuf> {
        let file_name = snapshot_file_name(source.label(), &format_timestamp(at));
        let path = self.dir.join(&file_name);

        let jpeg = frame.encode_jpeg(self.jpeg_quality)?;
        write_atomic(&path, &jpeg).map_err(|e| SnapError::Write {
            path: path.clone(),
            source: e,
        })?;

        self.diagnostics.info(
            EventKind::Save,
            format_args!("Save Frame for {} {}", source.display_address(), file_name),
        );
        Ok(path)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp_path = temp_path_for(path);
    let written = (|| {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, path)
    })();
    if written.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    written
}

/// Hidden, uniquely named sibling of `path` so concurrent writers never share
/// a temporary file.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let unique = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.{}-{}.tmp", name, std::process::id(), unique))
}
