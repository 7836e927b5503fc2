//! Error taxonomy for snapshot capture.
//!
//! Every per-cycle failure is one of these variants. The scheduler converts
//! them to diagnostics events at the cycle boundary; only `Config` and `State`
//! ever reach a caller of the generator API.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SnapError {
    /// Stream could not be opened: unreachable host, refused, auth failure,
    /// malformed address, protocol error.
    #[error("connection to {address} failed: {reason}")]
    Connection { address: String, reason: String },

    /// A packet could not be demultiplexed or decoded.
    #[error("decode error on {address}: {reason}")]
    Decode { address: String, reason: String },

    /// The session ended without yielding a decodable frame.
    #[error("no decodable frame available from {address}")]
    NoFrame { address: String },

    /// The decoded frame could not be turned into image bytes.
    #[error("failed to encode snapshot: {0}")]
    Encode(String),

    #[error("failed to write snapshot {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Lifecycle call made in the wrong generator state.
    #[error("invalid generator state: {0}")]
    State(String),

    #[error("cycle cancelled")]
    Cancelled,
}

impl SnapError {
    /// True for failures rooted in the local environment (encoding, disk)
    /// rather than in the remote stream.
    pub fn is_local(&self) -> bool {
        matches!(self, SnapError::Encode(_) | SnapError::Write { .. })
    }

    pub(crate) fn connection(address: &str, reason: impl std::fmt::Display) -> Self {
        SnapError::Connection {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn decode(address: &str, reason: impl std::fmt::Display) -> Self {
        SnapError::Decode {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SnapError>;
