//! RTSP Snapshot Generator
//!
//! Periodically captures a single still frame from each of several network
//! camera streams and stores it as a timestamped JPEG.
//!
//! # Architecture
//!
//! Every configured source runs on its own worker. A worker cycle connects,
//! reads packets until the first decodable frame, disconnects, then saves the
//! frame as `{label}_frame_{YYYYMMDD_HHMMSS}.jpg`. Failures are reported and
//! confined to the cycle that produced them; the next cycle retries after the
//! configured interval. Sources never block each other.
//!
//! # Module Structure
//!
//! - `source`: capture targets (label + connection address)
//! - `ingest`: stream backends (RTSP via FFmpeg, synthetic `stub://` streams)
//! - `fetch`: single-frame acquisition with guaranteed session release
//! - `writer`: snapshot naming and atomic JPEG persistence
//! - `scheduler`: per-source workers and the generator lifecycle
//! - `diagnostics`: per-instance console/file event output
//! - `config`: daemon configuration (JSON file + environment)

pub mod cancel;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fetch;
pub mod frame;
pub mod ingest;
pub mod scheduler;
pub mod source;
pub mod writer;

pub use cancel::CancelToken;
pub use diagnostics::{DiagnosticEvent, DiagnosticsSink, EventKind};
pub use error::{Result, SnapError};
pub use fetch::StreamFrameFetcher;
pub use frame::Frame;
pub use ingest::{
    OpenOptions, RtspOpener, StreamOpener, StreamSession, SyntheticOpener, Transport,
};
pub use scheduler::{
    run_cycle, CycleOutcome, GeneratorConfig, GeneratorState, SnapshotGenerator, StopReport,
};
pub use source::Source;
pub use writer::{snapshot_file_name, SnapshotWriter};
