//! Single-frame fetch from one source.
//!
//! A fetch opens a session, walks packets in arrival order, keeps the first
//! frame decoded from the first packet that yields one, and closes the session
//! before returning. The session is held by a guard, so it is closed on every
//! exit path: success, exhaustion, error, cancellation or panic.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::diagnostics::{DiagnosticsSink, EventKind};
use crate::error::{Result, SnapError};
use crate::frame::Frame;
use crate::ingest::{OpenOptions, StreamOpener, StreamSession};
use crate::source::Source;

pub struct StreamFrameFetcher<O: StreamOpener> {
    opener: Arc<O>,
    options: OpenOptions,
    diagnostics: Arc<DiagnosticsSink>,
}

impl<O: StreamOpener> StreamFrameFetcher<O> {
    pub fn new(opener: Arc<O>, options: OpenOptions, diagnostics: Arc<DiagnosticsSink>) -> Self {
        Self {
            opener,
            options,
            diagnostics,
        }
    }

    /// Fetches at most one frame, surfacing the failure reason.
    ///
    /// Open failures are not retried.
    pub fn fetch(&self, source: &Source, cancel: &CancelToken) -> Result<Frame> {
        let address = source.display_address();
        self.diagnostics
            .info(EventKind::Connect, format_args!("Connect: {}", address));

        let session = self.opener.open(source.address(), &self.options, cancel)?;
        let result = {
            let mut session = SessionGuard(session);
            first_frame(&mut *session, &address)
        };
        self.diagnostics
            .info(EventKind::Disconnect, format_args!("Disconnect: {}", address));
        result
    }

    /// Cycle-boundary variant of [`fetch`](Self::fetch): every failure is
    /// reported to diagnostics and becomes `None`.
    pub fn fetch_cycle(&self, source: &Source, cancel: &CancelToken) -> Option<Frame> {
        match self.fetch(source, cancel) {
            Ok(frame) => Some(frame),
            Err(SnapError::Cancelled) => {
                log::debug!("fetch for '{}' cancelled", source.label());
                None
            }
            Err(err @ SnapError::NoFrame { .. }) => {
                self.diagnostics
                    .warn(EventKind::NoFrame, format_args!("{}", err));
                None
            }
            Err(err) => {
                self.diagnostics
                    .error(EventKind::FetchError, format_args!("{}", err));
                None
            }
        }
    }
}

/// Closes the wrapped session when dropped.
struct SessionGuard<S: StreamSession>(S);

impl<S: StreamSession> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.0
    }
}

impl<S: StreamSession> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.0
    }
}

impl<S: StreamSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.0.close();
    }
}

fn first_frame<S: StreamSession>(session: &mut S, address: &str) -> Result<Frame> {
    while let Some(packet) = session.next_packet()? {
        if let Some(frame) = session.decode(packet)?.into_iter().next() {
            return Ok(frame);
        }
    }
    Err(SnapError::NoFrame {
        address: address.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SyntheticOpener;

    fn fetcher(opener: &SyntheticOpener) -> (StreamFrameFetcher<SyntheticOpener>, Arc<DiagnosticsSink>) {
        let sink = Arc::new(DiagnosticsSink::disabled());
        let fetcher = StreamFrameFetcher::new(
            Arc::new(opener.clone()),
            OpenOptions::default(),
            sink.clone(),
        );
        (fetcher, sink)
    }

    #[test]
    fn fetch_returns_first_frame_and_closes_session() -> Result<()> {
        let opener = SyntheticOpener::with_size(4, 4);
        let (fetcher, sink) = fetcher(&opener);
        let frame = fetcher.fetch(&Source::new("cam1", "stub://cam1"), &CancelToken::new())?;
        assert_eq!(frame.pts, Some(0));
        assert_eq!(opener.open_sessions(), 0);
        assert_eq!(sink.count(EventKind::Connect), 1);
        assert_eq!(sink.count(EventKind::Disconnect), 1);
        Ok(())
    }

    #[test]
    fn fetch_skips_packets_without_frames() -> Result<()> {
        let opener = SyntheticOpener::new();
        let (fetcher, _) = fetcher(&opener);
        let frame = fetcher.fetch(&Source::new("cam1", "stub://cam1?mode=late"), &CancelToken::new())?;
        assert_eq!(frame.pts, Some(2));
        assert_eq!(opener.open_sessions(), 0);
        Ok(())
    }

    #[test]
    fn exhausted_session_is_no_frame_and_still_closed() {
        let opener = SyntheticOpener::new();
        let (fetcher, sink) = fetcher(&opener);
        let source = Source::new("cam1", "stub://cam1?mode=empty");
        let err = fetcher.fetch(&source, &CancelToken::new()).err().expect("error");
        assert!(matches!(err, SnapError::NoFrame { .. }));
        assert_eq!(opener.open_sessions(), 0);

        assert!(fetcher.fetch_cycle(&source, &CancelToken::new()).is_none());
        assert_eq!(sink.count(EventKind::NoFrame), 1);
        assert_eq!(sink.count(EventKind::FetchError), 0);
    }

    #[test]
    fn decode_and_connection_errors_become_fetch_error_events() {
        let opener = SyntheticOpener::new();
        let (fetcher, sink) = fetcher(&opener);
        let cancel = CancelToken::new();

        let corrupt = Source::new("cam1", "stub://cam1?mode=corrupt");
        assert!(fetcher.fetch_cycle(&corrupt, &cancel).is_none());
        let unreachable = Source::new("cam2", "stub://cam2?mode=unreachable");
        assert!(fetcher.fetch_cycle(&unreachable, &cancel).is_none());

        assert_eq!(sink.count(EventKind::FetchError), 2);
        // only the corrupt source got as far as an open session
        assert_eq!(sink.count(EventKind::Disconnect), 1);
        assert_eq!(opener.open_sessions(), 0);
    }

    #[test]
    fn cancelled_fetch_is_silent() {
        let opener = SyntheticOpener::new();
        let (fetcher, sink) = fetcher(&opener);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(fetcher
            .fetch_cycle(&Source::new("cam1", "stub://cam1?mode=stall"), &cancel)
            .is_none());
        assert_eq!(sink.count(EventKind::FetchError), 0);
        assert_eq!(opener.open_sessions(), 0);
    }
}
