use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::diagnostics::DEFAULT_LOG_FILE;
use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::ingest::Transport;
use crate::scheduler::{
    GeneratorConfig, DEFAULT_INTERVAL, DEFAULT_IO_TIMEOUT, DEFAULT_MAX_WORKERS,
    DEFAULT_STOP_GRACE,
};
use crate::source::Source;
use crate::writer::DEFAULT_OUTPUT_DIR;

pub const CONFIG_ENV: &str = "RTSP_SNAP_CONFIG";

#[derive(Debug, Deserialize, Default)]
struct SnapConfigFile {
    sources: Option<Vec<SourceConfigFile>>,
    interval_secs: Option<u64>,
    output_dir: Option<PathBuf>,
    jpeg_quality: Option<u8>,
    logging: Option<LoggingConfigFile>,
    rtsp: Option<RtspConfigFile>,
    workers: Option<WorkersConfigFile>,
}

#[derive(Debug, Deserialize)]
struct SourceConfigFile {
    label: String,
    url: String,
}

#[derive(Debug, Deserialize, Default)]
struct LoggingConfigFile {
    console: Option<bool>,
    file: Option<bool>,
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct RtspConfigFile {
    transport: Option<String>,
    io_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct WorkersConfigFile {
    max: Option<usize>,
    stop_grace_secs: Option<u64>,
}

/// Daemon configuration: optional JSON file, then environment overrides.
///
/// Sources may legitimately be empty here; the binary can still add them from
/// the command line before the generator validates the final set.
#[derive(Debug, Clone)]
pub struct SnapConfig {
    pub sources: Vec<Source>,
    pub interval: Duration,
    pub output_dir: PathBuf,
    pub jpeg_quality: u8,
    pub logging: LoggingSettings,
    pub rtsp: RtspSettings,
    pub max_workers: usize,
    pub stop_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub console: bool,
    pub file: bool,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RtspSettings {
    pub transport: Transport,
    pub io_timeout: Duration,
}

impl SnapConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads from an explicit file, still honouring environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SnapConfigFile) -> Result<Self> {
        let sources = file
            .sources
            .unwrap_or_default()
            .into_iter()
            .map(|s| Source::new(s.label, s.url))
            .collect();
        let interval = file
            .interval_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_INTERVAL);
        let output_dir = file
            .output_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
        let logging = LoggingSettings {
            console: file
                .logging
                .as_ref()
                .and_then(|logging| logging.console)
                .unwrap_or(true),
            file: file
                .logging
                .as_ref()
                .and_then(|logging| logging.file)
                .unwrap_or(false),
            path: file
                .logging
                .and_then(|logging| logging.path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        };
        let transport = match file.rtsp.as_ref().and_then(|rtsp| rtsp.transport.as_deref()) {
            Some(value) => value.parse()?,
            None => Transport::default(),
        };
        let rtsp = RtspSettings {
            transport,
            io_timeout: file
                .rtsp
                .and_then(|rtsp| rtsp.io_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_IO_TIMEOUT),
        };
        let max_workers = file
            .workers
            .as_ref()
            .and_then(|workers| workers.max)
            .unwrap_or(DEFAULT_MAX_WORKERS);
        let stop_grace = file
            .workers
            .and_then(|workers| workers.stop_grace_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_STOP_GRACE);
        Ok(Self {
            sources,
            interval,
            output_dir,
            jpeg_quality: file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            logging,
            rtsp,
            max_workers,
            stop_grace,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(sources) = std::env::var("RTSP_SNAP_SOURCES") {
            let parsed = split_csv(&sources)
                .iter()
                .map(|pair| {
                    Source::parse_pair(pair).ok_or_else(|| {
                        anyhow!("RTSP_SNAP_SOURCES entry '{}' is not label=url", pair)
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            if !parsed.is_empty() {
                self.sources = parsed;
            }
        }
        if let Ok(interval) = std::env::var("RTSP_SNAP_INTERVAL_SECS") {
            let seconds: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("RTSP_SNAP_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.interval = Duration::from_secs(seconds);
        }
        if let Ok(dir) = std::env::var("RTSP_SNAP_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(value) = std::env::var("RTSP_SNAP_CONSOLE_LOG") {
            self.logging.console = parse_flag("RTSP_SNAP_CONSOLE_LOG", &value)?;
        }
        if let Ok(value) = std::env::var("RTSP_SNAP_FILE_LOG") {
            self.logging.file = parse_flag("RTSP_SNAP_FILE_LOG", &value)?;
        }
        if let Ok(path) = std::env::var("RTSP_SNAP_LOG_FILE") {
            if !path.trim().is_empty() {
                self.logging.path = PathBuf::from(path);
            }
        }
        if let Ok(transport) = std::env::var("RTSP_SNAP_TRANSPORT") {
            if !transport.trim().is_empty() {
                self.rtsp.transport = transport.parse().context("RTSP_SNAP_TRANSPORT")?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(anyhow!("interval must be greater than zero"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if self.max_workers == 0 {
            return Err(anyhow!("workers.max must be at least 1"));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(anyhow!("output_dir must not be empty"));
        }
        Ok(())
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            sources: self.sources.clone(),
            interval: self.interval,
            output_dir: self.output_dir.clone(),
            console_logging: self.logging.console,
            file_logging: self.logging.file,
            log_file: self.logging.path.clone(),
            transport: self.rtsp.transport,
            io_timeout: self.rtsp.io_timeout,
            max_workers: self.max_workers,
            stop_grace: self.stop_grace,
            jpeg_quality: self.jpeg_quality,
        }
    }
}

fn read_config_file(path: &Path) -> Result<SnapConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("read config {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("parse config {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect()
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("{} must be a boolean, got '{}'", name, other)),
    }
}
