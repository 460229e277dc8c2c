//! Session error types.

use switchboard_transport::TransportError;
use thiserror::Error;

/// Represents errors raised by a peer session.
///
/// The type is `Clone` so a single establishment failure can be surfaced to
/// every caller awaiting the same shared connection attempt.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum SessionError {
    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The peer sent something the session could not decode or route.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The initialize exchange failed or produced an invalid result.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The peer answered a request with a JSON-RPC error.
    #[error("peer returned error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Human-readable error message from the peer.
        message: String,
    },

    /// An operation on the session exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The session closed before the operation completed.
    #[error("session closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_conversion() {
        let err: SessionError = TransportError::SendFailed("pipe".to_string()).into();
        assert!(matches!(err, SessionError::Transport(_)));
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = SessionError::Rpc {
            code: -32601,
            message: "method not found".to_string(),
        };
        assert_eq!(err.to_string(), err.clone().to_string());
    }
}
