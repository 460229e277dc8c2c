//! Streamable HTTP transport.
//!
//! Each outbound frame is POSTed to the peer's base URL with an `Accept`
//! header offering both `application/json` and `text/event-stream`. The server
//! may answer with 202 (no body), a single JSON body, or an SSE stream whose
//! `data` events are queued for [`Transport::receive`]. A `Mcp-Session-Id`
//! response header is recorded and replayed on subsequent requests; disconnect
//! issues a best-effort DELETE carrying that session id.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client as HttpClient, StatusCode, header};
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{TransportError, TransportResult};
use crate::events::TransportEventEmitter;
use crate::frame::Frame;
use crate::traits::Transport;
use crate::types::{TransportKind, TransportState};

/// Header the server uses to assign and correlate a session.
const SESSION_ID_HEADER: &str = "Mcp-Session-Id";

/// Pop the next complete SSE event block off the front of `buffer`.
///
/// The buffer holds raw bytes and decoding happens per complete event, so a
/// multi-byte UTF-8 character split across chunk boundaries stays intact.
fn next_event(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.windows(2).position(|w| w == b"\n\n")?;
    let event = String::from_utf8_lossy(&buffer[..pos]).into_owned();
    buffer.drain(..pos + 2);
    Some(event)
}

/// Extract the joined `data` payload from one SSE event block.
///
/// Returns `None` for comment-only or keep-alive events.
fn sse_data(event: &str) -> Option<String> {
    let mut data: Vec<&str> = Vec::new();
    for line in event.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data.is_empty() {
        return None;
    }
    let joined = data.join("\n");
    if joined.trim().is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Streamable HTTP transport bound to a validated absolute base URL.
pub struct HttpTransport {
    base_url: Url,
    client: HttpClient,
    state: StdMutex<TransportState>,
    events: TransportEventEmitter,
    session_id: StdMutex<Option<String>>,
    incoming_tx: mpsc::Sender<TransportResult<Frame>>,
    incoming_rx: TokioMutex<mpsc::Receiver<TransportResult<Frame>>>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("state", &self.state)
            .finish()
    }
}

impl HttpTransport {
    /// Create a transport bound to `base_url`.
    ///
    /// The URL has already been validated (absolute, http/https scheme) by the
    /// binding layer; construction allocates no network resources.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::channel(256);

        // Cargo features are additive and another dependency may pull in
        // native-tls, so rustls must be selected explicitly.
        let client = HttpClient::builder()
            .use_rustls_tls()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            base_url,
            client,
            state: StdMutex::new(TransportState::Disconnected),
            events: TransportEventEmitter::default(),
            session_id: StdMutex::new(None),
            incoming_tx,
            incoming_rx: TokioMutex::new(incoming_rx),
        }
    }

    /// Replace the default (discarding) event emitter.
    #[must_use]
    pub fn with_event_emitter(mut self, events: TransportEventEmitter) -> Self {
        self.events = events;
        self
    }

    fn set_state(&self, new_state: TransportState) {
        let mut state = self.state.lock().expect("state mutex poisoned");
        if *state != new_state {
            trace!("http transport state: {} -> {}", *state, new_state);
            *state = new_state.clone();

            match new_state {
                TransportState::Connected => {
                    self.events
                        .emit_connected(TransportKind::Http, self.base_url.to_string());
                }
                TransportState::Disconnected => {
                    self.events.emit_disconnected(
                        TransportKind::Http,
                        self.base_url.to_string(),
                        None,
                    );
                }
                TransportState::Failed { reason } => {
                    self.events.emit_disconnected(
                        TransportKind::Http,
                        self.base_url.to_string(),
                        Some(reason),
                    );
                }
                _ => {}
            }
        }
    }

    fn record_session_id(&self, response: &reqwest::Response) {
        if let Some(sid) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            debug!(endpoint = %self.base_url, session_id = %sid, "recorded peer session id");
            *self.session_id.lock().expect("session id mutex poisoned") = Some(sid.to_string());
        }
    }

    fn current_session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .expect("session id mutex poisoned")
            .clone()
    }

    /// Drain an SSE response body, queuing each `data` event as a frame.
    fn spawn_sse_reader(&self, response: reqwest::Response) {
        let tx = self.incoming_tx.clone();
        let endpoint = self.base_url.to_string();
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        buffer.extend_from_slice(&bytes);
                        while let Some(event) = next_event(&mut buffer) {
                            if let Some(data) = sse_data(&event)
                                && tx.try_send(Ok(Frame::from(data))).is_err()
                            {
                                debug!(endpoint = %endpoint, "frame channel closed, dropping SSE stream");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(endpoint = %endpoint, "error reading SSE stream: {e}");
                        let _ = tx.try_send(Err(TransportError::ReceiveFailed(e.to_string())));
                        return;
                    }
                }
            }
            trace!(endpoint = %endpoint, "SSE response body ended");
        });
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn endpoint(&self) -> String {
        self.base_url.to_string()
    }

    fn state(&self) -> TransportState {
        self.state.lock().expect("state mutex poisoned").clone()
    }

    async fn connect(&self) -> TransportResult<()> {
        // Streamable HTTP allocates per request; connect is a state transition.
        self.set_state(TransportState::Connected);
        debug!(endpoint = %self.base_url, "http transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if matches!(self.state(), TransportState::Disconnected) {
            return Ok(());
        }

        self.set_state(TransportState::Disconnecting);

        // Best-effort session teardown; failures must not block shutdown.
        // The id is taken out before the request so the lock never crosses
        // the await.
        let sid = self
            .session_id
            .lock()
            .expect("session id mutex poisoned")
            .take();
        if let Some(sid) = sid {
            let result = self
                .client
                .delete(self.base_url.clone())
                .header(SESSION_ID_HEADER, sid)
                .send()
                .await;
            if let Err(e) = result {
                debug!(endpoint = %self.base_url, "session delete failed: {e}");
            }
        }

        self.set_state(TransportState::Disconnected);
        debug!(endpoint = %self.base_url, "http transport disconnected");
        Ok(())
    }

    async fn send(&self, frame: Frame) -> TransportResult<()> {
        let state = self.state();
        if !matches!(state, TransportState::Connected) {
            return Err(TransportError::ConnectionFailed(format!(
                "transport not connected: {state}"
            )));
        }

        let mut request = self
            .client
            .post(self.base_url.clone())
            .header(header::ACCEPT, "application/json, text/event-stream")
            .header(header::CONTENT_TYPE, "application/json")
            .body(frame.payload().clone());

        if let Some(sid) = self.current_session_id() {
            request = request.header(SESSION_ID_HEADER, sid);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        self.record_session_id(&response);

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            trace!(endpoint = %self.base_url, "frame accepted without body");
            return Ok(());
        }
        if !status.is_success() {
            error!(endpoint = %self.base_url, status = %status, "peer rejected frame");
            return Err(TransportError::SendFailed(format!(
                "peer returned {status}"
            )));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("text/event-stream") {
            self.spawn_sse_reader(response);
            return Ok(());
        }

        if content_type.starts_with("application/json") {
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
            if !body.is_empty() {
                let _ = self.incoming_tx.try_send(Ok(Frame::new(body)));
            }
            return Ok(());
        }

        Err(TransportError::ProtocolError(format!(
            "unexpected response content type: '{content_type}'"
        )))
    }

    async fn receive(&self) -> TransportResult<Option<Frame>> {
        let state = self.state();
        if !matches!(state, TransportState::Connected) {
            return Err(TransportError::ConnectionFailed(format!(
                "transport not connected: {state}"
            )));
        }

        let mut incoming = self.incoming_rx.lock().await;
        match incoming.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn transport(url: &str) -> HttpTransport {
        HttpTransport::new(Url::parse(url).unwrap())
    }

    #[test]
    fn test_endpoint_label() {
        let t = transport("https://peers.example.com/mcp");
        assert_eq!(t.kind(), TransportKind::Http);
        assert_eq!(t.endpoint(), "https://peers.example.com/mcp");
    }

    #[tokio::test]
    async fn test_connect_is_state_transition_only() {
        let t = transport("http://localhost:9999/mcp");
        assert_eq!(t.state(), TransportState::Disconnected);
        t.connect().await.unwrap();
        assert_eq!(t.state(), TransportState::Connected);
        t.disconnect().await.unwrap();
        assert_eq!(t.state(), TransportState::Disconnected);
        // Second disconnect is a no-op.
        t.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let t = transport("http://localhost:9999/mcp");
        let frame = Frame::json(&serde_json::json!({"jsonrpc":"2.0"})).unwrap();
        let result = t.send(frame).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[test]
    fn test_sse_data_single_line() {
        let event = "event: message\nid: 3\ndata: {\"jsonrpc\":\"2.0\"}";
        assert_eq!(sse_data(event).as_deref(), Some("{\"jsonrpc\":\"2.0\"}"));
    }

    #[test]
    fn test_sse_data_multi_line() {
        let event = "data: first\ndata: second";
        assert_eq!(sse_data(event).as_deref(), Some("first\nsecond"));
    }

    #[test]
    fn test_lifecycle_futures_are_send() {
        // The transport is shared across tasks; its futures must stay Send,
        // which rules out holding a std mutex guard across an await.
        fn require_send<T: Send>(_fut: T) {}
        let t = transport("https://peers.example.com/mcp");
        require_send(t.connect());
        require_send(t.disconnect());
    }

    #[test]
    fn test_next_event_reassembles_split_utf8() {
        let bytes = "data: h\u{e9}llo\n\n".as_bytes();
        // Split inside the two-byte encoding of 'é'.
        let (head, tail) = bytes.split_at(8);

        let mut buffer = Vec::new();
        buffer.extend_from_slice(head);
        assert_eq!(next_event(&mut buffer), None);

        buffer.extend_from_slice(tail);
        assert_eq!(next_event(&mut buffer).as_deref(), Some("data: héllo"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_next_event_pops_blocks_in_order() {
        let mut buffer = b"data: one\n\ndata: two\n\ndata: thr".to_vec();
        assert_eq!(next_event(&mut buffer).as_deref(), Some("data: one"));
        assert_eq!(next_event(&mut buffer).as_deref(), Some("data: two"));
        // The trailing partial block waits for more bytes.
        assert_eq!(next_event(&mut buffer), None);
        assert_eq!(buffer, b"data: thr");
    }

    #[test]
    fn test_sse_data_ignores_comments_and_keepalives() {
        assert_eq!(sse_data(": keep-alive"), None);
        assert_eq!(sse_data("event: ping"), None);
        assert_eq!(sse_data("data: "), None);
    }
}
