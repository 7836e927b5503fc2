//! Synthetic stream backend (`stub://` addresses).
//!
//! Produces generated RGB frames without any network access. The query string
//! selects a failure mode so the scheduler can be exercised against every
//! per-cycle outcome:
//!
//! | mode          | behaviour                                                    |
//! |---------------|--------------------------------------------------------------|
//! | `ok`          | first packet decodes to a frame (default)                    |
//! | `unreachable` | open fails with a connection error                           |
//! | `empty`       | packets never decode; session ends without a frame           |
//! | `corrupt`     | first packet fails to decode                                 |
//! | `late`        | two undecodable packets precede the first good one           |
//! | `stall`       | packet read blocks until the cycle is cancelled              |
//! | `slow`        | packet read ignores cancellation for `delay_ms`, then a frame |
//!
//! Example: `stub://gate?mode=slow&delay_ms=500`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use super::{OpenOptions, StreamOpener, StreamSession};
use crate::cancel::CancelToken;
use crate::error::{Result, SnapError};
use crate::frame::{rgb_len, Frame};
use crate::source::redact_address;

const DEFAULT_WIDTH: u32 = 64;
const DEFAULT_HEIGHT: u32 = 48;
const PACKETS_PER_SESSION: u32 = 5;
const LATE_UNDECODABLE_PACKETS: u32 = 2;
const STALL_LIMIT: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SyntheticMode {
    Ok,
    Unreachable,
    Empty,
    Corrupt,
    Late,
    Stall,
    Slow(Duration),
}

/// Opener for `stub://` sessions. Clones share session counters.
#[derive(Clone, Debug)]
pub struct SyntheticOpener {
    width: u32,
    height: u32,
    open_sessions: Arc<AtomicUsize>,
    sessions_opened: Arc<AtomicU64>,
}

impl Default for SyntheticOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticOpener {
    pub fn new() -> Self {
        Self::with_size(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }

    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            open_sessions: Arc::new(AtomicUsize::new(0)),
            sessions_opened: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sessions currently open (opened and not yet closed).
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Sessions successfully opened over the opener's lifetime.
    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::SeqCst)
    }
}

impl StreamOpener for SyntheticOpener {
    type Session = SyntheticSession;

    fn open(
        &self,
        address: &str,
        _options: &OpenOptions,
        cancel: &CancelToken,
    ) -> Result<SyntheticSession> {
        let mode = parse_mode(address)?;
        if mode == SyntheticMode::Unreachable {
            return Err(SnapError::connection(
                &redact_address(address),
                "host unreachable (synthetic)",
            ));
        }
        if cancel.is_cancelled() {
            return Err(SnapError::Cancelled);
        }

        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        let seed = self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "synthetic session opened for {} ({:?})",
            redact_address(address),
            mode
        );

        Ok(SyntheticSession {
            address: redact_address(address),
            mode,
            cancel: cancel.clone(),
            width: self.width,
            height: self.height,
            seed,
            packets_read: 0,
            open_sessions: Some(self.open_sessions.clone()),
        })
    }
}

/// Packet emitted by a synthetic session.
#[derive(Clone, Copy, Debug)]
pub struct SyntheticPacket {
    index: u32,
    decodable: bool,
}

pub struct SyntheticSession {
    address: String,
    mode: SyntheticMode,
    cancel: CancelToken,
    width: u32,
    height: u32,
    seed: u64,
    packets_read: u32,
    /// Present while the session is open.
    open_sessions: Option<Arc<AtomicUsize>>,
}

impl SyntheticSession {
    fn generate_pixels(&self, packet_index: u32) -> Vec<u8> {
        let pixel_count = rgb_len(self.width, self.height);
        let offset = self.seed.wrapping_mul(31) + packet_index as u64;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + offset) % 256) as u8;
        }
        pixels
    }

    fn is_decodable(&self, index: u32) -> bool {
        match self.mode {
            SyntheticMode::Empty => false,
            SyntheticMode::Late => index >= LATE_UNDECODABLE_PACKETS,
            _ => true,
        }
    }
}

impl StreamSession for SyntheticSession {
    type Packet = SyntheticPacket;

    fn next_packet(&mut self) -> Result<Option<SyntheticPacket>> {
        if self.open_sessions.is_none() {
            return Err(SnapError::decode(&self.address, "session already closed"));
        }
        if self.packets_read >= PACKETS_PER_SESSION {
            return Ok(None);
        }

        match self.mode {
            SyntheticMode::Stall => {
                self.cancel.sleep(STALL_LIMIT);
                return Err(SnapError::Cancelled);
            }
            SyntheticMode::Slow(delay) => std::thread::sleep(delay),
            _ => {
                if self.cancel.is_cancelled() {
                    return Err(SnapError::Cancelled);
                }
            }
        }

        let index = self.packets_read;
        self.packets_read += 1;
        Ok(Some(SyntheticPacket {
            index,
            decodable: self.is_decodable(index),
        }))
    }

    fn decode(&mut self, packet: SyntheticPacket) -> Result<Vec<Frame>> {
        if self.mode == SyntheticMode::Corrupt {
            return Err(SnapError::decode(&self.address, "corrupt packet (synthetic)"));
        }
        if !packet.decodable {
            return Ok(Vec::new());
        }
        let frame = Frame::from_rgb(self.generate_pixels(packet.index), self.width, self.height)?
            .with_pts(Some(packet.index as i64));
        Ok(vec![frame])
    }

    fn close(&mut self) {
        if let Some(counter) = self.open_sessions.take() {
            counter.fetch_sub(1, Ordering::SeqCst);
            log::debug!("synthetic session closed for {}", self.address);
        }
    }
}

impl Drop for SyntheticSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn parse_mode(address: &str) -> Result<SyntheticMode> {
    let url = Url::parse(address).map_err(|e| SnapError::connection(address, e))?;
    if url.scheme() != "stub" {
        return Err(SnapError::connection(
            address,
            "synthetic backend only accepts stub:// addresses",
        ));
    }

    let mut mode = None;
    let mut delay_ms = 0u64;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "mode" => mode = Some(value.into_owned()),
            "delay_ms" => {
                delay_ms = value.parse().map_err(|_| {
                    SnapError::connection(address, "delay_ms must be an integer")
                })?
            }
            _ => {}
        }
    }

    match mode.as_deref().unwrap_or("ok") {
        "ok" => Ok(SyntheticMode::Ok),
        "unreachable" => Ok(SyntheticMode::Unreachable),
        "empty" => Ok(SyntheticMode::Empty),
        "corrupt" => Ok(SyntheticMode::Corrupt),
        "late" => Ok(SyntheticMode::Late),
        "stall" => Ok(SyntheticMode::Stall),
        "slow" => Ok(SyntheticMode::Slow(Duration::from_millis(delay_ms))),
        other => Err(SnapError::connection(
            address,
            format!("unknown synthetic mode '{}'", other),
        )),
    }
}
