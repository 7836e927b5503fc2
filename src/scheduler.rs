//! Per-source snapshot scheduling.
//!
//! `SnapshotGenerator` runs one worker thread per configured source. Each
//! worker repeats a cycle (fetch one frame, then save it) and sleeps for the
//! configured interval between the end of one cycle and the start of the next.
//! Workers share only the diagnostics sink and the output directory.
//!
//! Lifecycle is a one-way state machine:
//!
//! ```text
//! Created --start()--> Running --stop()--> Stopped
//! ```
//!
//! Any other transition fails with `SnapError::State`. A stopped generator is
//! not restartable; construct a new one instead.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::diagnostics::{DiagnosticsSink, EventKind, DEFAULT_LOG_FILE};
use crate::error::{Result, SnapError};
use crate::fetch::StreamFrameFetcher;
use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::ingest::{OpenOptions, RtspOpener, StreamOpener, Transport};
use crate::source::Source;
use crate::writer::{ensure_output_dir, SnapshotWriter, DEFAULT_OUTPUT_DIR};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_WORKERS: usize = 64;
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Generator construction options.
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub sources: Vec<Source>,
    /// Delay between the end of one cycle and the start of the next, per source.
    pub interval: Duration,
    pub output_dir: PathBuf,
    pub console_logging: bool,
    pub file_logging: bool,
    /// Destination of the file diagnostics, used when `file_logging` is set.
    pub log_file: PathBuf,
    pub transport: Transport,
    /// Bound on any single blocking network operation inside the backend.
    pub io_timeout: Duration,
    /// Upper bound on concurrent source workers.
    pub max_workers: usize,
    /// How long `stop()` waits for in-flight cycles before abandoning them.
    pub stop_grace: Duration,
    pub jpeg_quality: u8,
}

impl GeneratorConfig {
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            sources,
            interval: DEFAULT_INTERVAL,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            console_logging: true,
            file_logging: false,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            transport: Transport::default(),
            io_timeout: DEFAULT_IO_TIMEOUT,
            max_workers: DEFAULT_MAX_WORKERS,
            stop_grace: DEFAULT_STOP_GRACE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(SnapError::Config("at least one source is required".into()));
        }
        if let Some(source) = self.sources.iter().find(|s| s.label().trim().is_empty()) {
            return Err(SnapError::Config(format!(
                "source {} has an empty label",
                source.display_address()
            )));
        }
        if self.interval.is_zero() {
            return Err(SnapError::Config("interval must be greater than zero".into()));
        }
        if self.max_workers == 0 {
            return Err(SnapError::Config("max_workers must be at least 1".into()));
        }
        if self.sources.len() > self.max_workers {
            return Err(SnapError::Config(format!(
                "{} sources exceed the worker bound of {}",
                self.sources.len(),
                self.max_workers
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(SnapError::Config("jpeg_quality must be within 1..=100".into()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(SnapError::Config("output directory must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeneratorState {
    Created,
    Running,
    Stopped,
}

/// Outcome of `stop()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Workers that exited within the grace period and were joined.
    pub joined: usize,
    /// Workers still blocked after the grace period. They were detached and
    /// exit on their own once their backend call returns; their results are
    /// discarded.
    pub abandoned: usize,
}

/// Result of a single fetch-then-save cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    Saved(PathBuf),
    /// Fetch produced no frame; the reason was already reported.
    NoFrame,
    WriteFailed(SnapError),
    /// Generator stopped during the cycle; any fetched frame was discarded.
    Cancelled,
}

struct Worker {
    label: String,
    handle: JoinHandle<()>,
}

pub struct SnapshotGenerator<O: StreamOpener = RtspOpener> {
    config: GeneratorConfig,
    state: GeneratorState,
    fetcher: Arc<StreamFrameFetcher<O>>,
    writer: Arc<SnapshotWriter>,
    diagnostics: Arc<DiagnosticsSink>,
    cancel: CancelToken,
    workers: Vec<Worker>,
    exits: Option<Receiver<usize>>,
    active: Arc<AtomicUsize>,
}

impl SnapshotGenerator<RtspOpener> {
    /// Generator backed by the default RTSP opener.
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        Self::with_opener(config, RtspOpener::new())
    }
}

impl<O: StreamOpener> SnapshotGenerator<O> {
    pub fn with_opener(config: GeneratorConfig, opener: O) -> Result<Self> {
        Self::with_shared_opener(config, Arc::new(opener))
    }

    /// Validates `config`, builds the diagnostics sink and creates the output
    /// directory if missing. No worker runs until `start()`.
    pub fn with_shared_opener(config: GeneratorConfig, opener: Arc<O>) -> Result<Self> {
        config.validate()?;

        let log_file = config.file_logging.then_some(config.log_file.as_path());
        let diagnostics = Arc::new(DiagnosticsSink::new(config.console_logging, log_file)?);

        if ensure_output_dir(&config.output_dir)? {
            diagnostics.info(
                EventKind::Lifecycle,
                format_args!("Create Recording Directory: {}", config.output_dir.display()),
            );
        }

        let options = OpenOptions {
            transport: config.transport,
            io_timeout: config.io_timeout,
        };
        let fetcher = Arc::new(StreamFrameFetcher::new(opener, options, diagnostics.clone()));
        let writer = Arc::new(SnapshotWriter::new(
            config.output_dir.clone(),
            config.jpeg_quality,
            diagnostics.clone(),
        ));

        Ok(Self {
            config,
            state: GeneratorState::Created,
            fetcher,
            writer,
            diagnostics,
            cancel: CancelToken::new(),
            workers: Vec::new(),
            exits: None,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn state(&self) -> GeneratorState {
        self.state
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn sources(&self) -> &[Source] {
        &self.config.sources
    }

    pub fn output_dir(&self) -> &Path {
        self.writer.dir()
    }

    pub fn diagnostics(&self) -> &DiagnosticsSink {
        &self.diagnostics
    }

    /// Worker threads currently alive, including abandoned ones.
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Launches one worker per source.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            GeneratorState::Created => {}
            GeneratorState::Running => {
                return Err(SnapError::State("generator is already running".into()))
            }
            GeneratorState::Stopped => {
                return Err(SnapError::State(
                    "generator has been stopped; construct a new one".into(),
                ))
            }
        }

        let (exit_tx, exit_rx) = mpsc::channel();
        self.exits = Some(exit_rx);
        self.state = GeneratorState::Running;

        let sources = self.config.sources.clone();
        for (index, source) in sources.iter().enumerate() {
            let worker = WorkerLoop {
                source: source.clone(),
                interval: self.config.interval,
                fetcher: self.fetcher.clone(),
                writer: self.writer.clone(),
                diagnostics: self.diagnostics.clone(),
                cancel: self.cancel.clone(),
            };
            let exit = ExitSignal {
                index,
                active: self.active.clone(),
                exits: exit_tx.clone(),
            };

            self.active.fetch_add(1, Ordering::SeqCst);
            let spawned = thread::Builder::new()
                .name(format!("rtsp-snap:{}", source.label()))
                .spawn(move || {
                    let _exit = exit;
                    worker.run();
                });
            match spawned {
                Ok(handle) => self.workers.push(Worker {
                    label: source.label().to_string(),
                    handle,
                }),
                Err(e) => {
                    // the closure (and its ExitSignal) was dropped without running
                    let label = source.label().to_string();
                    if let Err(stop_err) = self.stop() {
                        log::error!("stopping after failed spawn: {}", stop_err);
                    }
                    return Err(SnapError::Config(format!(
                        "cannot spawn worker for '{}': {}",
                        label, e
                    )));
                }
            }
        }

        self.diagnostics.info(
            EventKind::Lifecycle,
            format_args!(
                "Started {} source worker(s), interval {}s, output {}",
                self.workers.len(),
                self.config.interval.as_secs_f64(),
                self.config.output_dir.display()
            ),
        );
        Ok(())
    }

    /// Stops all workers. No new cycle starts after this call; cycles still
    /// blocked in the backend after `stop_grace` are abandoned.
    pub fn stop(&mut self) -> Result<StopReport> {
        match self.state {
            GeneratorState::Running => {}
            GeneratorState::Created => {
                return Err(SnapError::State("generator was never started".into()))
            }
            GeneratorState::Stopped => {
                return Err(SnapError::State("generator is already stopped".into()))
            }
        }
        self.state = GeneratorState::Stopped;
        self.cancel.cancel();

        let mut exited = vec![false; self.workers.len()];
        if let Some(exits) = self.exits.take() {
            // a grace past the end of the clock waits for every worker
            let deadline = Instant::now().checked_add(self.config.stop_grace);
            let mut remaining = self.workers.len();
            while remaining > 0 {
                let received = match deadline {
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        exits.recv_timeout(deadline - now)
                    }
                    None => exits.recv().map_err(|_| RecvTimeoutError::Disconnected),
                };
                match received {
                    Ok(index) => {
                        if let Some(flag) = exited.get_mut(index).filter(|flag| !**flag) {
                            *flag = true;
                            remaining -= 1;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }

        let mut report = StopReport::default();
        for (worker, exited) in self.workers.drain(..).zip(exited) {
            if exited {
                if worker.handle.join().is_err() {
                    log::error!("worker for '{}' panicked", worker.label);
                }
                report.joined += 1;
            } else {
                log::warn!(
                    "worker for '{}' still blocked after {:?}; abandoning it",
                    worker.label,
                    self.config.stop_grace
                );
                report.abandoned += 1;
            }
        }

        self.diagnostics.info(
            EventKind::Lifecycle,
            format_args!(
                "Stopped {} source worker(s), {} abandoned",
                report.joined + report.abandoned,
                report.abandoned
            ),
        );
        Ok(report)
    }
}

impl<O: StreamOpener> Drop for SnapshotGenerator<O> {
    fn drop(&mut self) {
        if self.state == GeneratorState::Running {
            if let Err(e) = self.stop() {
                log::error!("stopping generator on drop: {}", e);
            }
        }
    }
}

/// Decrements the live-worker gauge and reports the exit, even on panic.
struct ExitSignal {
    index: usize,
    active: Arc<AtomicUsize>,
    exits: Sender<usize>,
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        let _ = self.exits.send(self.index);
    }
}

struct WorkerLoop<O: StreamOpener> {
    source: Source,
    interval: Duration,
    fetcher: Arc<StreamFrameFetcher<O>>,
    writer: Arc<SnapshotWriter>,
    diagnostics: Arc<DiagnosticsSink>,
    cancel: CancelToken,
}

impl<O: StreamOpener> WorkerLoop<O> {
    fn run(self) {
        log::debug!("worker for '{}' started", self.source.label());
        let mut write_failures = 0u32;

        while !self.cancel.is_cancelled() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                run_cycle(&self.fetcher, &self.writer, &self.source, &self.cancel)
            }))
            .unwrap_or_else(|_| {
                self.diagnostics.error(
                    EventKind::FetchError,
                    format_args!("cycle for {} panicked", self.source.display_address()),
                );
                CycleOutcome::NoFrame
            });

            match outcome {
                CycleOutcome::Saved(_) => write_failures = 0,
                CycleOutcome::WriteFailed(err) => {
                    write_failures += 1;
                    let kind = if err.is_local() {
                        EventKind::WriteError
                    } else {
                        EventKind::FetchError
                    };
                    self.diagnostics.error(
                        kind,
                        format_args!(
                            "{} ({} consecutive write failure(s) for '{}')",
                            err,
                            write_failures,
                            self.source.label()
                        ),
                    );
                }
                CycleOutcome::NoFrame | CycleOutcome::Cancelled => {}
            }

            if self.cancel.sleep(self.interval) {
                break;
            }
        }
        log::debug!("worker for '{}' exiting", self.source.label());
    }
}

/// Runs one fetch-then-save cycle. Fetch failures are reported by the fetcher;
/// write failures are returned for the caller to report.
pub fn run_cycle<O: StreamOpener>(
    fetcher: &StreamFrameFetcher<O>,
    writer: &SnapshotWriter,
    source: &Source,
    cancel: &CancelToken,
) -> CycleOutcome {
    let Some(frame) = fetcher.fetch_cycle(source, cancel) else {
        return if cancel.is_cancelled() {
            CycleOutcome::Cancelled
        } else {
            CycleOutcome::NoFrame
        };
    };
    if cancel.is_cancelled() {
        log::debug!(
            "discarding frame for '{}' fetched after stop",
            source.label()
        );
        return CycleOutcome::Cancelled;
    }
    match writer.save(&frame, source) {
        Ok(path) => CycleOutcome::Saved(path),
        Err(err) => CycleOutcome::WriteFailed(err),
    }
}
