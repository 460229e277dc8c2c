//! Frame payloads carried by transports.

use bytes::Bytes;
use serde::Serialize;

use crate::error::{TransportError, TransportResult};

/// A single JSON payload carried over a transport.
///
/// Frames are opaque to the transport layer except for the stdio framing rule:
/// a frame sent over a newline-delimited pipe must not itself contain literal
/// newline bytes, and must be well-formed JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    /// Create a frame from raw bytes.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Serialize a value into a JSON frame.
    pub fn json<T: Serialize>(value: &T) -> TransportResult<Self> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self {
            payload: Bytes::from(payload),
        })
    }

    /// The raw payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The payload size in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Render the frame as a single newline-safe JSON line.
    ///
    /// Newline-delimited framing requires that messages never contain literal
    /// newline bytes; escaped sequences (`\n` as backslash-n inside a JSON
    /// string) are fine because they do not contain the delimiter byte itself.
    pub fn into_line(self) -> TransportResult<String> {
        let line = std::str::from_utf8(&self.payload)
            .map_err(|e| TransportError::SerializationFailed(e.to_string()))?;

        // Must come before JSON validation to catch all literal newline cases.
        if line.contains('\n') || line.contains('\r') {
            return Err(TransportError::ProtocolError(
                "frame contains embedded newlines (forbidden by newline-delimited framing)"
                    .to_string(),
            ));
        }

        let _: serde_json::Value = serde_json::from_str(line)?;

        Ok(line.to_string())
    }
}

impl From<String> for Frame {
    fn from(line: String) -> Self {
        Self::new(line.into_bytes())
    }
}
