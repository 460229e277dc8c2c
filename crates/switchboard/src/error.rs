//! Lifecycle error types.

use std::time::Duration;

use switchboard_session::SessionError;
use thiserror::Error;

use crate::config::ConfigError;

/// Represents errors raised by the connection lifecycle core.
///
/// The type is `Clone` so one failed connection attempt can surface the same
/// error to every caller that joined it.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The peer registry or a peer entry is unusable.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A connection attempt failed before the handle became usable.
    #[error("failed to initialize connection to peer '{peer}': {source}")]
    InitializationFailed {
        /// Peer the attempt targeted.
        peer: String,
        /// The session failure behind the attempt.
        #[source]
        source: SessionError,
    },

    /// The peer cannot be used even though no attempt-level failure occurred.
    #[error("peer '{peer}' unavailable: {reason}")]
    Unavailable {
        /// Peer name.
        peer: String,
        /// What made the peer unavailable.
        reason: String,
    },

    /// A bounded lifecycle operation exceeded its deadline.
    #[error("operation '{operation}' on peer '{peer}' timed out after {timeout:?}")]
    Timeout {
        /// Peer name.
        peer: String,
        /// The operation that exceeded the deadline.
        operation: String,
        /// The configured bound.
        timeout: Duration,
    },
}

impl Error {
    pub(crate) fn initialization(peer: impl Into<String>, source: SessionError) -> Self {
        Self::InitializationFailed {
            peer: peer.into(),
            source,
        }
    }

    pub(crate) fn unavailable(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            peer: peer.into(),
            reason: reason.into(),
        }
    }
}
