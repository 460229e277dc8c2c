//! The core transport trait.

use async_trait::async_trait;

use crate::error::TransportResult;
use crate::frame::Frame;
use crate::types::{TransportKind, TransportState};

/// The core trait for all transport implementations.
///
/// This trait defines the essential asynchronous operations for a frame-based
/// communication channel: connecting, disconnecting, sending, and receiving.
///
/// Implementations must acquire no process or network resources before
/// `connect` is called, and `disconnect` must release them exactly once (a
/// second call is a no-op).
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Returns the kind of this transport.
    fn kind(&self) -> TransportKind;

    /// Returns a descriptive endpoint label for logging.
    fn endpoint(&self) -> String;

    /// Returns the current state of the transport.
    fn state(&self) -> TransportState;

    /// Establishes the connection to the remote endpoint.
    async fn connect(&self) -> TransportResult<()>;

    /// Closes the connection and releases underlying resources. Idempotent.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Sends a single frame over the transport.
    async fn send(&self, frame: Frame) -> TransportResult<()>;

    /// Receives the next frame from the transport.
    ///
    /// Returns `Ok(None)` when the remote side closed the stream cleanly, and
    /// `Err` for receive failures. Both outcomes are terminal.
    async fn receive(&self) -> TransportResult<Option<Frame>>;

    /// Returns `true` if the transport is currently in the `Connected` state.
    fn is_connected(&self) -> bool {
        matches!(self.state(), TransportState::Connected)
    }
}
