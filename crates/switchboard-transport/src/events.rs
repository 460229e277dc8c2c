//! Transport event types.

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::types::TransportKind;

/// Represents events that occur within a transport's lifecycle.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A connection has been established.
    Connected {
        /// The kind of transport that connected.
        kind: TransportKind,
        /// The endpoint of the connection.
        endpoint: String,
    },

    /// A connection has been lost or closed.
    Disconnected {
        /// The kind of transport that disconnected.
        kind: TransportKind,
        /// The endpoint of the connection.
        endpoint: String,
        /// An optional reason for the disconnection; `None` for a clean close.
        reason: Option<String>,
    },

    /// An error has occurred in the transport.
    Error {
        /// The error that occurred.
        error: TransportError,
        /// Optional additional context about the error.
        context: Option<String>,
    },
}

/// An emitter for broadcasting [`TransportEvent`]s to a listener.
#[derive(Debug, Clone)]
pub struct TransportEventEmitter {
    sender: mpsc::Sender<TransportEvent>,
}

impl TransportEventEmitter {
    /// Creates a new event emitter and a corresponding receiver.
    #[must_use]
    pub fn new() -> (Self, mpsc::Receiver<TransportEvent>) {
        let (sender, receiver) = mpsc::channel(64);
        (Self { sender }, receiver)
    }

    /// Emits an event, dropping it if the channel is full to avoid blocking.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.sender.try_send(event);
    }

    /// Emits a `Connected` event.
    pub fn emit_connected(&self, kind: TransportKind, endpoint: String) {
        self.emit(TransportEvent::Connected { kind, endpoint });
    }

    /// Emits a `Disconnected` event.
    pub fn emit_disconnected(&self, kind: TransportKind, endpoint: String, reason: Option<String>) {
        self.emit(TransportEvent::Disconnected {
            kind,
            endpoint,
            reason,
        });
    }

    /// Emits an `Error` event.
    pub fn emit_error(&self, error: TransportError, context: Option<String>) {
        self.emit(TransportEvent::Error { error, context });
    }
}

impl Default for TransportEventEmitter {
    fn default() -> Self {
        Self::new().0
    }
}
