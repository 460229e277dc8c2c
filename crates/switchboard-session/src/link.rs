//! The opaque-handle contract consumed by the lifecycle core.

use async_trait::async_trait;

use crate::error::SessionError;

/// The small surface the connection lifecycle core needs from a peer handle.
///
/// [`crate::PeerSession`] is the production implementation; tests substitute
/// doubles to exercise the core without transports.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// The peer name this handle is connected to.
    fn peer(&self) -> &str;

    /// Whether the handle is still usable.
    fn is_open(&self) -> bool;

    /// Close the handle and release its underlying resources.
    ///
    /// Must be idempotent: the first call tears down, later calls are no-ops.
    async fn close(&self) -> Result<(), SessionError>;
}
