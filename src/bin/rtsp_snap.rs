//! rtsp_snap - periodic RTSP snapshot daemon
//!
//! This daemon:
//! 1. Loads configuration (RTSP_SNAP_CONFIG file, environment, command line)
//! 2. Starts one snapshot worker per source
//! 3. Runs until Ctrl-C (or `--run-for` elapses), then stops the workers

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use rtsp_snap::config::SnapConfig;
use rtsp_snap::{SnapshotGenerator, Source, Transport};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Periodically save one JPEG frame from each RTSP source"
)]
struct Args {
    /// JSON configuration file. Falls back to RTSP_SNAP_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Source as label=url. Repeat for multiple cameras; replaces configured sources.
    #[arg(long = "source", value_parser = parse_source)]
    sources: Vec<Source>,

    /// Seconds between the end of one capture and the start of the next.
    #[arg(long)]
    interval: Option<u64>,

    /// Directory for snapshot files.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Disable diagnostics on stderr.
    #[arg(long)]
    no_console_log: bool,

    /// Append diagnostics to the log file.
    #[arg(long)]
    file_log: bool,

    /// Diagnostics log file (used with --file-log).
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// RTSP lower transport: tcp, udp, udp_multicast, http.
    #[arg(long)]
    transport: Option<Transport>,

    /// Upper bound on concurrent source workers.
    #[arg(long)]
    max_workers: Option<usize>,

    /// Stop automatically after this many seconds.
    #[arg(long)]
    run_for: Option<u64>,
}

fn parse_source(raw: &str) -> std::result::Result<Source, String> {
    Source::parse_pair(raw).ok_or_else(|| format!("expected label=url, got '{}'", raw))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    #[cfg(feature = "rtsp-ffmpeg")]
    ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Error);

    let mut config = match &args.config {
        Some(path) => SnapConfig::load_from(path)?,
        None => SnapConfig::load()?,
    };
    if !args.sources.is_empty() {
        config.sources = args.sources.clone();
    }
    if let Some(secs) = args.interval {
        config.interval = Duration::from_secs(secs);
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if args.no_console_log {
        config.logging.console = false;
    }
    if args.file_log {
        config.logging.file = true;
    }
    if let Some(path) = &args.log_file {
        config.logging.path = path.clone();
    }
    if let Some(transport) = args.transport {
        config.rtsp.transport = transport;
    }
    if let Some(max) = args.max_workers {
        config.max_workers = max;
    }

    let mut generator = SnapshotGenerator::new(config.generator_config())?;
    generator.start()?;
    log::info!(
        "rtsp_snap running: {} source(s), writing to {}",
        config.sources.len(),
        generator.output_dir().display()
    );

    if let Some(path) = generator.diagnostics().file_path() {
        log::info!("diagnostics appended to {}", path.display());
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    match args.run_for {
        Some(secs) => match rx.recv_timeout(Duration::from_secs(secs)) {
            Ok(()) => log::info!("shutdown signal received"),
            Err(RecvTimeoutError::Timeout) => log::info!("run time of {}s elapsed", secs),
            Err(RecvTimeoutError::Disconnected) => {}
        },
        None => {
            log::info!("waiting for shutdown signal (Ctrl-C)...");
            let _ = rx.recv();
            log::info!("shutdown signal received");
        }
    }

    let report = generator.stop()?;
    if report.abandoned > 0 {
        log::warn!(
            "{} worker(s) abandoned mid-fetch; their frames are discarded",
            report.abandoned
        );
    }
    log::info!("stopped {} worker(s)", report.joined + report.abandoned);
    Ok(())
}
