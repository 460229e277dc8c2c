//! Local-process pipe transport.
//!
//! Spawns a configured executable and exchanges newline-delimited JSON frames
//! over its stdin/stdout. The child's stderr is forwarded line-by-line into
//! `tracing` so peer diagnostics stay visible without corrupting the framing.
//!
//! # Interior Mutability Pattern
//!
//! - `std::sync::Mutex` for state (short-lived locks, never cross .await)
//! - `tokio::sync::Mutex` for I/O streams and the child handle (cross .await points)
//!
//! # Environment policy
//!
//! The spawned child does **not** inherit the parent process environment.
//! Only a small allow-list of baseline variables is forwarded, merged with the
//! explicitly configured `env` map (configured entries win). This keeps parent
//! secrets out of spawned peers.

use std::collections::HashMap;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Mutex as StdMutex;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, trace, warn};

use crate::error::{TransportError, TransportResult};
use crate::events::TransportEventEmitter;
use crate::frame::Frame;
use crate::traits::Transport;
use crate::types::{TransportKind, TransportState};

use async_trait::async_trait;

/// Environment variables forwarded from the parent into spawned peers.
const BASE_ENV_ALLOW_LIST: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

type BoxedAsyncRead = Pin<Box<dyn AsyncRead + Send + Sync + 'static>>;
type BoxedAsyncWrite = Pin<Box<dyn AsyncWrite + Send + Sync + 'static>>;
type FrameWriter = FramedWrite<BoxedAsyncWrite, LinesCodec>;

/// Where the transport's byte streams come from.
enum Source {
    /// Spawn the configured executable on connect.
    Command {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    /// Use raw streams (loopback and in-process testing).
    Raw {
        reader: Option<BoxedAsyncRead>,
        writer: Option<BoxedAsyncWrite>,
    },
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command { command, args, .. } => f
                .debug_struct("Command")
                .field("command", command)
                .field("args", args)
                .finish(),
            Self::Raw { .. } => write!(f, "Raw"),
        }
    }
}

/// Compute the environment for a spawned peer from a base set and the
/// configured allow-list, with configured entries winning on conflict.
fn merged_environment(
    base: impl IntoIterator<Item = (String, String)>,
    configured: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = base
        .into_iter()
        .filter(|(key, _)| BASE_ENV_ALLOW_LIST.contains(&key.as_str()))
        .collect();
    env.extend(
        configured
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    env
}

/// The baseline variables taken from the current process environment.
fn base_environment() -> impl Iterator<Item = (String, String)> {
    BASE_ENV_ALLOW_LIST
        .iter()
        .filter_map(|name| std::env::var(name).ok().map(|v| ((*name).to_string(), v)))
}

/// Local-process pipe transport.
///
/// # Examples
///
/// ```rust,ignore
/// use switchboard_transport::{StdioTransport, Transport};
///
/// let transport = StdioTransport::new("my-peer-server", vec![], Default::default())?;
/// transport.connect().await?;
/// ```
pub struct StdioTransport {
    endpoint: String,
    state: StdMutex<TransportState>,
    events: TransportEventEmitter,
    source: TokioMutex<Source>,
    writer: TokioMutex<Option<FrameWriter>>,
    incoming: TokioMutex<Option<mpsc::Receiver<TransportResult<Frame>>>>,
    child: TokioMutex<Option<Child>>,
    read_task: TokioMutex<Option<tokio::task::JoinHandle<()>>>,
    stderr_task: TokioMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .finish()
    }
}

impl StdioTransport {
    /// Create a transport that will spawn `command` with `args` on connect.
    ///
    /// Validation is synchronous and acquires no resources: the child process
    /// is spawned only when [`Transport::connect`] is called.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if `command` is empty.
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> TransportResult<Self> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(TransportError::ConfigurationError(
                "stdio transport requires a non-empty command".to_string(),
            ));
        }

        Ok(Self::with_source(
            format!("stdio://{command}"),
            Source::Command { command, args, env },
        ))
    }

    /// Create a transport over raw async read/write streams.
    ///
    /// This is the loopback constructor used by tests: `reader` is the stream
    /// frames arrive on, `writer` the stream frames are written to.
    pub fn from_raw<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
        W: AsyncWrite + Send + Sync + 'static,
    {
        Self::with_source(
            "stdio://<raw>".to_string(),
            Source::Raw {
                reader: Some(Box::pin(reader)),
                writer: Some(Box::pin(writer)),
            },
        )
    }

    /// Replace the default (discarding) event emitter.
    #[must_use]
    pub fn with_event_emitter(mut self, events: TransportEventEmitter) -> Self {
        self.events = events;
        self
    }

    fn with_source(endpoint: String, source: Source) -> Self {
        Self {
            endpoint,
            state: StdMutex::new(TransportState::Disconnected),
            events: TransportEventEmitter::default(),
            source: TokioMutex::new(source),
            writer: TokioMutex::new(None),
            incoming: TokioMutex::new(None),
            child: TokioMutex::new(None),
            read_task: TokioMutex::new(None),
            stderr_task: TokioMutex::new(None),
        }
    }

    fn set_state(&self, new_state: TransportState) {
        // std::sync::Mutex: short-lived lock, never crosses await
        let mut state = self.state.lock().expect("state mutex poisoned");
        if *state != new_state {
            trace!("stdio transport state: {} -> {}", *state, new_state);
            *state = new_state.clone();

            match new_state {
                TransportState::Connected => {
                    self.events
                        .emit_connected(TransportKind::Stdio, self.endpoint.clone());
                }
                TransportState::Disconnected => {
                    self.events
                        .emit_disconnected(TransportKind::Stdio, self.endpoint.clone(), None);
                }
                TransportState::Failed { reason } => {
                    self.events.emit_disconnected(
                        TransportKind::Stdio,
                        self.endpoint.clone(),
                        Some(reason),
                    );
                }
                _ => {}
            }
        }
    }

    async fn setup_streams(&self) -> TransportResult<()> {
        let mut source = self.source.lock().await;

        let (reader, writer): (BoxedAsyncRead, BoxedAsyncWrite) = match &mut *source {
            Source::Command { command, args, env } => {
                let mut child = Command::new(&*command)
                    .args(args.iter())
                    .env_clear()
                    .envs(merged_environment(base_environment(), env))
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|e| {
                        TransportError::ConnectionFailed(format!(
                            "failed to spawn '{command}': {e}"
                        ))
                    })?;

                let stdin = child.stdin.take().ok_or_else(|| {
                    TransportError::ConnectionFailed("child stdin was not piped".to_string())
                })?;
                let stdout = child.stdout.take().ok_or_else(|| {
                    TransportError::ConnectionFailed("child stdout was not piped".to_string())
                })?;

                if let Some(stderr) = child.stderr.take() {
                    let endpoint = self.endpoint.clone();
                    let task = tokio::spawn(async move {
                        let mut lines = BufReader::new(stderr).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            debug!(peer = %endpoint, "peer stderr: {line}");
                        }
                    });
                    *self.stderr_task.lock().await = Some(task);
                }

                *self.child.lock().await = Some(child);
                (Box::pin(stdout), Box::pin(stdin))
            }
            Source::Raw { reader, writer } => {
                let reader = reader.take().ok_or_else(|| {
                    TransportError::ConfigurationError(
                        "raw reader stream already consumed".to_string(),
                    )
                })?;
                let writer = writer.take().ok_or_else(|| {
                    TransportError::ConfigurationError(
                        "raw writer stream already consumed".to_string(),
                    )
                })?;
                (reader, writer)
            }
        };

        *self.writer.lock().await = Some(FramedWrite::new(writer, LinesCodec::new()));

        // Bounded channel for backpressure between the reader task and receive().
        let (tx, rx) = mpsc::channel::<TransportResult<Frame>>(256);
        *self.incoming.lock().await = Some(rx);

        let mut framed = FramedRead::new(BufReader::new(reader), LinesCodec::new());
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            while let Some(result) = framed.next().await {
                match result {
                    Ok(line) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        trace!("received line: {} bytes", line.len());
                        match tx.try_send(Ok(Frame::from(line))) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                warn!("stdio frame channel full, dropping frame");
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                debug!("frame channel closed, stopping reader task");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        let err = TransportError::ReceiveFailed(e.to_string());
                        error!("failed to read from peer stdout: {e}");
                        events.emit_error(err.clone(), Some("stdout read".to_string()));
                        let _ = tx.try_send(Err(err));
                        break;
                    }
                }
            }
            // Dropping tx signals clean end-of-stream to receive().
            debug!("stdio reader task completed");
        });
        *self.read_task.lock().await = Some(task);

        Ok(())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn state(&self) -> TransportState {
        self.state.lock().expect("state mutex poisoned").clone()
    }

    async fn connect(&self) -> TransportResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        self.set_state(TransportState::Connecting);

        match self.setup_streams().await {
            Ok(()) => {
                self.set_state(TransportState::Connected);
                debug!(endpoint = %self.endpoint, "stdio transport connected");
                Ok(())
            }
            Err(e) => {
                self.set_state(TransportState::Failed {
                    reason: e.to_string(),
                });
                error!(endpoint = %self.endpoint, "failed to connect stdio transport: {e}");
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if matches!(self.state(), TransportState::Disconnected) {
            return Ok(());
        }

        self.set_state(TransportState::Disconnecting);

        if let Some(task) = self.read_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.lock().await.take() {
            task.abort();
        }

        // Dropping the writer closes the child's stdin.
        *self.writer.lock().await = None;
        *self.incoming.lock().await = None;

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(endpoint = %self.endpoint, "failed to kill peer process: {e}");
            }
        }

        self.set_state(TransportState::Disconnected);
        debug!(endpoint = %self.endpoint, "stdio transport disconnected");
        Ok(())
    }

    async fn send(&self, frame: Frame) -> TransportResult<()> {
        let state = self.state();
        if !matches!(state, TransportState::Connected) {
            return Err(TransportError::ConnectionFailed(format!(
                "transport not connected: {state}"
            )));
        }

        let line = frame.into_line()?;
        let size = line.len();

        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(TransportError::SendFailed(
                "peer stdin not available".to_string(),
            ));
        };

        if let Err(e) = writer.send(line).await {
            error!(endpoint = %self.endpoint, "failed to send frame: {e}");
            self.set_state(TransportState::Failed {
                reason: e.to_string(),
            });
            return Err(TransportError::SendFailed(e.to_string()));
        }
        if let Err(e) = SinkExt::<String>::flush(writer).await {
            error!(endpoint = %self.endpoint, "failed to flush peer stdin: {e}");
            return Err(TransportError::SendFailed(e.to_string()));
        }

        trace!("sent frame: {size} bytes");
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Option<Frame>> {
        let state = self.state();
        if !matches!(state, TransportState::Connected) {
            return Err(TransportError::ConnectionFailed(format!(
                "transport not connected: {state}"
            )));
        }

        let mut incoming = self.incoming.lock().await;
        let Some(receiver) = incoming.as_mut() else {
            return Err(TransportError::ReceiveFailed(
                "frame channel not available".to_string(),
            ));
        };

        match receiver.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => {
                self.set_state(TransportState::Failed {
                    reason: e.to_string(),
                });
                Err(e)
            }
            // Reader task ended without an error: the peer closed the stream.
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn base(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_merged_environment_filters_parent_secrets() {
        let parent = base(&[
            ("PATH", "/usr/bin"),
            ("HOME", "/home/me"),
            ("AWS_SECRET_ACCESS_KEY", "hunter2"),
            ("DATABASE_URL", "postgres://secret"),
        ]);
        let merged = merged_environment(parent, &HashMap::new());

        assert_eq!(merged.get("PATH").map(String::as_str), Some("/usr/bin"));
        assert_eq!(merged.get("HOME").map(String::as_str), Some("/home/me"));
        assert!(!merged.contains_key("AWS_SECRET_ACCESS_KEY"));
        assert!(!merged.contains_key("DATABASE_URL"));
    }

    #[test]
    fn test_merged_environment_configured_entries_win() {
        let parent = base(&[("PATH", "/usr/bin")]);
        let configured = HashMap::from([
            ("PATH".to_string(), "/opt/peer/bin".to_string()),
            ("API_TOKEN".to_string(), "abc".to_string()),
        ]);
        let merged = merged_environment(parent, &configured);

        assert_eq!(merged.get("PATH").map(String::as_str), Some("/opt/peer/bin"));
        assert_eq!(merged.get("API_TOKEN").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_new_rejects_empty_command() {
        let result = StdioTransport::new("", vec![], HashMap::new());
        assert!(matches!(result, Err(TransportError::ConfigurationError(_))));

        let result = StdioTransport::new("   ", vec![], HashMap::new());
        assert!(matches!(result, Err(TransportError::ConfigurationError(_))));
    }

    #[test]
    fn test_endpoint_label() {
        let transport = StdioTransport::new("echo-server", vec![], HashMap::new()).unwrap();
        assert_eq!(transport.endpoint(), "stdio://echo-server");
        assert_eq!(transport.kind(), TransportKind::Stdio);
    }

    #[tokio::test]
    async fn test_from_raw_connect_send_receive() {
        let (client_tx, server_rx) = tokio::io::duplex(4096);
        let (server_tx, client_rx) = tokio::io::duplex(4096);

        let client = StdioTransport::from_raw(client_rx, client_tx);
        let server = StdioTransport::from_raw(server_rx, server_tx);

        assert_eq!(client.state(), TransportState::Disconnected);
        client.connect().await.unwrap();
        server.connect().await.unwrap();
        assert_eq!(client.state(), TransportState::Connected);

        let frame = Frame::json(&serde_json::json!({"jsonrpc":"2.0","id":1,"method":"ping"}))
            .unwrap();
        client.send(frame.clone()).await.unwrap();

        let received = server.receive().await.unwrap().unwrap();
        assert_eq!(received.payload(), frame.payload());

        client.disconnect().await.unwrap();
        server.disconnect().await.unwrap();
        assert_eq!(client.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn test_receive_reports_clean_close() {
        let (client_tx, server_rx) = tokio::io::duplex(1024);
        let (_server_tx, client_rx) = tokio::io::duplex(1024);

        let client = StdioTransport::from_raw(client_rx, client_tx);
        client.connect().await.unwrap();

        // Dropping the peer's write half ends our read stream.
        drop(server_rx);
        drop(_server_tx);

        let received = client.receive().await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let transport = StdioTransport::new("echo-server", vec![], HashMap::new()).unwrap();
        let frame = Frame::json(&serde_json::json!({"jsonrpc":"2.0"})).unwrap();
        let result = transport.send(frame).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_connect_spawn_failure() {
        let transport = StdioTransport::new(
            "/nonexistent/switchboard-test-binary",
            vec![],
            HashMap::new(),
        )
        .unwrap();
        let result = transport.connect().await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(matches!(transport.state(), TransportState::Failed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawned_cat_echoes_frames() {
        // `cat` echoes stdin to stdout, so any frame we send comes back.
        let transport = StdioTransport::new("cat", vec![], HashMap::new()).unwrap();
        transport.connect().await.unwrap();

        let frame = Frame::json(&serde_json::json!({"jsonrpc":"2.0","id":7,"method":"ping"}))
            .unwrap();
        transport.send(frame.clone()).await.unwrap();

        let received = transport.receive().await.unwrap().unwrap();
        assert_eq!(received.payload(), frame.payload());

        transport.disconnect().await.unwrap();
        // Second disconnect is a no-op.
        transport.disconnect().await.unwrap();
        assert_eq!(transport.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn test_double_connect_is_idempotent() {
        let (client_tx, _server_rx) = tokio::io::duplex(1024);
        let (_server_tx, client_rx) = tokio::io::duplex(1024);

        let client = StdioTransport::from_raw(client_rx, client_tx);
        client.connect().await.unwrap();
        client.connect().await.unwrap();
        assert_eq!(client.state(), TransportState::Connected);
    }
}
