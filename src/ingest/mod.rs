//! Stream ingestion backends.
//!
//! This module is the seam between snapshot scheduling and the stream library:
//! - `StreamOpener`: opens one network session for an address
//! - `StreamSession`: demultiplexes packets in arrival order and decodes them
//!
//! Backends:
//! - `stub://` synthetic streams (tests, dry runs)
//! - RTSP via FFmpeg (feature: rtsp-ffmpeg)
//!
//! A session is finite and not restartable; a new cycle opens a new session.
//! Sessions MUST release their network resources in `close()`, and `close()`
//! MUST be safe to call more than once.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{Result, SnapError};
use crate::frame::Frame;

pub mod rtsp;
#[cfg(feature = "rtsp-ffmpeg")]
pub mod rtsp_ffmpeg;
pub mod synthetic;

pub use rtsp::RtspOpener;
pub use synthetic::SyntheticOpener;

/// Reliability mode used to receive the stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Transport {
    /// Interleaved over the RTSP TCP connection (reliable, ordered).
    #[default]
    Tcp,
    Udp,
    UdpMulticast,
    /// RTSP tunnelled over HTTP.
    Http,
}

impl Transport {
    /// Value of FFmpeg's `rtsp_transport` option.
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
            Transport::UdpMulticast => "udp_multicast",
            Transport::Http => "http",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = SnapError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            "udp_multicast" | "multicast" => Ok(Transport::UdpMulticast),
            "http" => Ok(Transport::Http),
            other => Err(SnapError::Config(format!(
                "unknown transport '{}'; expected tcp, udp, udp_multicast or http",
                other
            ))),
        }
    }
}

/// Per-open options handed to a backend.
#[derive(Clone, Debug)]
pub struct OpenOptions {
    pub transport: Transport,
    /// Upper bound for any single blocking network operation.
    pub io_timeout: Duration,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            transport: Transport::Tcp,
            io_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens stream sessions. Shared by every worker, so it must be thread-safe.
pub trait StreamOpener: Send + Sync + 'static {
    type Session: StreamSession;

    fn open(&self, address: &str, options: &OpenOptions, cancel: &CancelToken)
        -> Result<Self::Session>;
}

/// One open stream connection.
pub trait StreamSession {
    type Packet;

    /// Next demultiplexed packet in arrival order, or `None` once the session
    /// is exhausted.
    fn next_packet(&mut self) -> Result<Option<Self::Packet>>;

    /// Decodes zero or more frames from a packet, in order.
    fn decode(&mut self, packet: Self::Packet) -> Result<Vec<Frame>>;

    /// Releases the connection. Idempotent.
    fn close(&mut self);
}
