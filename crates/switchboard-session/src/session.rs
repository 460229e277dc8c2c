//! Peer session: handshake, request correlation, and lifecycle events.
//!
//! A [`PeerSession`] owns a transport and runs a background read loop that is
//! the single consumer of `transport.receive()`. Responses are routed to
//! waiting `request()` calls through oneshot channels registered *before* the
//! request is sent; terminal conditions are forwarded as [`SessionEvent`]s to
//! the subscriber obtained at construction time, which exists before
//! `connect()` runs so no event can be missed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use switchboard_transport::{Frame, Transport, TransportError};

use crate::error::SessionError;
use crate::wire::{
    CallToolResult, ClientCapabilities, ClientInfo, InitializeParams, InitializeResult,
    JsonRpcVersion, ListToolsResult, Notification, PROTOCOL_VERSION, Request, Response,
    ResponsePayload, RpcError, ServerInfo,
};

/// Terminal conditions a session reports to its subscriber.
///
/// Every variant means the connection should be torn down; the lifecycle core
/// reacts by routing each one into its disconnect path.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The peer sent traffic the session could not decode or route.
    ProtocolError(String),
    /// The transport failed while receiving.
    TransportError(TransportError),
    /// The peer closed the stream without an error.
    Closed,
}

struct SessionInner {
    peer: String,
    identity: ClientInfo,
    transport: Arc<dyn Transport>,
    /// Response waiters, keyed by request id. Registered before send so the
    /// read loop can never observe a response without its waiter.
    waiters: StdMutex<HashMap<u64, oneshot::Sender<Response>>>,
    next_id: AtomicU64,
    events: mpsc::Sender<SessionEvent>,
    open: AtomicBool,
    closed: AtomicBool,
    read_task: StdMutex<Option<tokio::task::JoinHandle<()>>>,
    server_info: StdMutex<Option<ServerInfo>>,
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        // Dropped rather than blocking the read loop if the subscriber lags.
        let _ = self.events.try_send(event);
    }

    /// Route one inbound frame: responses to their waiters, requests to a
    /// method-not-found reply, notifications to the log.
    async fn route_frame(&self, frame: &Frame) {
        let value: Value = match serde_json::from_slice(frame.payload()) {
            Ok(value) => value,
            Err(e) => {
                error!(peer = %self.peer, "undecodable frame from peer: {e}");
                self.emit(SessionEvent::ProtocolError(format!(
                    "undecodable frame: {e}"
                )));
                return;
            }
        };

        if let Some(method) = value.get("method").and_then(Value::as_str) {
            if value.get("id").is_some() {
                // Server-initiated request. This handle is a pure consumer,
                // so answer method-not-found rather than leaving the peer
                // waiting on a response that will never come.
                warn!(peer = %self.peer, method = %method, "rejecting server-initiated request");
                let reply = json!({
                    "jsonrpc": "2.0",
                    "error": {"code": -32601, "message": format!("method not supported: {method}")},
                    "id": value.get("id"),
                });
                match Frame::json(&reply) {
                    Ok(frame) => {
                        if let Err(e) = self.transport.send(frame).await {
                            debug!(peer = %self.peer, "failed to send error reply: {e}");
                        }
                    }
                    Err(e) => debug!(peer = %self.peer, "failed to encode error reply: {e}"),
                }
            } else {
                trace!(peer = %self.peer, method = %method, "notification from peer");
            }
            return;
        }

        match serde_json::from_value::<Response>(value) {
            Ok(response) => {
                let Some(id) = response.id else {
                    warn!(peer = %self.peer, "response with null id from peer");
                    self.emit(SessionEvent::ProtocolError(
                        "response with null id".to_string(),
                    ));
                    return;
                };
                let waiter = self
                    .waiters
                    .lock()
                    .expect("waiter mutex poisoned")
                    .remove(&id);
                match waiter {
                    // Ignore a send error: the requester gave up and dropped
                    // its receiver.
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        warn!(peer = %self.peer, id, "response for unknown request id");
                    }
                }
            }
            Err(e) => {
                error!(peer = %self.peer, "unroutable frame from peer: {e}");
                self.emit(SessionEvent::ProtocolError(format!(
                    "unroutable frame: {e}"
                )));
            }
        }
    }
}

impl std::fmt::Debug for SessionInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInner")
            .field("peer", &self.peer)
            .field("open", &self.open)
            .field("closed", &self.closed)
            .finish()
    }
}

/// A handle to one connected peer.
///
/// Cheaply cloneable (`Arc` inner); all clones share the same transport,
/// read loop, and close-once guard.
#[derive(Debug, Clone)]
pub struct PeerSession {
    inner: Arc<SessionInner>,
}

impl PeerSession {
    /// Create a session over a not-yet-connected transport.
    ///
    /// Returns the session and the event receiver. The receiver exists before
    /// [`PeerSession::connect`] runs, so failure and close events can be wired
    /// up ahead of the first suspension point.
    pub fn new(
        peer: impl Into<String>,
        transport: Box<dyn Transport>,
        identity: ClientInfo,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events, receiver) = mpsc::channel(32);
        let session = Self {
            inner: Arc::new(SessionInner {
                peer: peer.into(),
                identity,
                transport: Arc::from(transport),
                waiters: StdMutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                events,
                open: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                read_task: StdMutex::new(None),
                server_info: StdMutex::new(None),
            }),
        };
        (session, receiver)
    }

    /// The peer name this session belongs to.
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    /// Whether the session has completed its handshake and is not closed.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst) && !self.inner.closed.load(Ordering::SeqCst)
    }

    /// The identity the peer reported during the handshake, if connected.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.inner
            .server_info
            .lock()
            .expect("server info mutex poisoned")
            .clone()
    }

    /// Connect the transport, run the initialize exchange, and start the
    /// response-routing read loop.
    ///
    /// This is the session's one long-running operation; every failure mode
    /// surfaces as a [`SessionError`] without caching any partial state.
    pub async fn connect(&self) -> Result<InitializeResult, SessionError> {
        self.inner.transport.connect().await?;
        self.spawn_read_loop();

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: self.inner.identity.clone(),
        };
        let params = serde_json::to_value(&params)
            .map_err(|e| SessionError::Handshake(format!("invalid initialize params: {e}")))?;
        let value = self.request("initialize", Some(params)).await?;
        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|e| SessionError::Handshake(format!("invalid initialize result: {e}")))?;

        if result.protocol_version != PROTOCOL_VERSION {
            warn!(
                peer = %self.inner.peer,
                offered = PROTOCOL_VERSION,
                settled = %result.protocol_version,
                "peer settled on a different protocol revision"
            );
        }

        *self
            .inner
            .server_info
            .lock()
            .expect("server info mutex poisoned") = Some(result.server_info.clone());

        self.notify("notifications/initialized", None).await?;
        self.inner.open.store(true, Ordering::SeqCst);

        debug!(
            peer = %self.inner.peer,
            server = %result.server_info.name,
            version = %result.server_info.version,
            "session established"
        );
        Ok(result)
    }

    /// Close the session: stop the read loop, fail outstanding requests, and
    /// disconnect the transport. Idempotent; only the first call tears down.
    pub async fn close(&self) -> Result<(), SessionError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.open.store(false, Ordering::SeqCst);

        if let Some(task) = self
            .inner
            .read_task
            .lock()
            .expect("read task mutex poisoned")
            .take()
        {
            task.abort();
        }

        // Dropping the senders fails every outstanding request with `Closed`.
        self.inner
            .waiters
            .lock()
            .expect("waiter mutex poisoned")
            .clear();

        debug!(peer = %self.inner.peer, "closing session");
        self.inner.transport.disconnect().await?;
        Ok(())
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<(), SessionError> {
        self.request("ping", None).await.map(|_| ())
    }

    /// List the tools the peer advertises.
    pub async fn list_tools(&self) -> Result<ListToolsResult, SessionError> {
        let value = self.request("tools/list", None).await?;
        serde_json::from_value(value)
            .map_err(|e| SessionError::Protocol(format!("invalid tools/list result: {e}")))
    }

    /// Invoke a tool on the peer.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, SessionError> {
        let mut params = json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        let value = self.request("tools/call", Some(params)).await?;
        serde_json::from_value(value)
            .map_err(|e| SessionError::Protocol(format!("invalid tools/call result: {e}")))
    }

    /// Send a request and await its correlated response.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, SessionError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner
            .waiters
            .lock()
            .expect("waiter mutex poisoned")
            .insert(id, tx);
        trace!(peer = %self.inner.peer, method, id, "sending request");

        let request = Request {
            jsonrpc: JsonRpcVersion,
            method: method.to_string(),
            params,
            id,
        };
        let frame = Frame::json(&request).map_err(SessionError::Transport)?;
        if let Err(e) = self.inner.transport.send(frame).await {
            self.inner
                .waiters
                .lock()
                .expect("waiter mutex poisoned")
                .remove(&id);
            return Err(SessionError::Transport(e));
        }

        // The sender disappears when the session closes or the read loop dies.
        let response = rx.await.map_err(|_| SessionError::Closed)?;
        match response.payload {
            ResponsePayload::Success { result } => Ok(result),
            ResponsePayload::Error {
                error: RpcError { code, message, .. },
            } => Err(SessionError::Rpc { code, message }),
        }
    }

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), SessionError> {
        let notification = Notification {
            jsonrpc: JsonRpcVersion,
            method: method.to_string(),
            params,
        };
        let frame = Frame::json(&notification).map_err(SessionError::Transport)?;
        self.inner.transport.send(frame).await?;
        Ok(())
    }

    /// Start the single consumer of `transport.receive()`.
    fn spawn_read_loop(&self) {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            loop {
                match inner.transport.receive().await {
                    Ok(Some(frame)) => inner.route_frame(&frame).await,
                    Ok(None) => {
                        debug!(peer = %inner.peer, "peer closed the stream");
                        inner.emit(SessionEvent::Closed);
                        break;
                    }
                    Err(e) => {
                        error!(peer = %inner.peer, "transport receive failed: {e}");
                        inner.emit(SessionEvent::TransportError(e));
                        break;
                    }
                }
            }
            // Fail any requests still waiting for a response.
            inner.waiters.lock().expect("waiter mutex poisoned").clear();
        });
        *self
            .inner
            .read_task
            .lock()
            .expect("read task mutex poisoned") = Some(task);
    }
}

#[async_trait::async_trait]
impl crate::link::PeerLink for PeerSession {
    fn peer(&self) -> &str {
        PeerSession::peer(self)
    }

    fn is_open(&self) -> bool {
        PeerSession::is_open(self)
    }

    async fn close(&self) -> Result<(), SessionError> {
        PeerSession::close(self).await
    }
}
