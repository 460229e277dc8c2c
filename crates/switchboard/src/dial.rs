//! Establisher: one end-to-end connection attempt per call.
//!
//! The [`Dialer`] trait is the injection seam between the orchestrator and
//! the transport/session machinery; [`PeerDialer`] is the production
//! implementation, test doubles stand in for it in orchestrator tests. The
//! disconnect callback is injected so session events can trigger orchestrator
//! cleanup without the establisher depending on the orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use switchboard_session::{ClientInfo, PeerLink, PeerSession, SessionEvent};
use switchboard_transport::{StandardTransportFactory, TransportFactory};

use crate::config::{ConfigError, PeerRegistry};
use crate::error::Error;

/// Callback invoked when a session reports a terminal event.
///
/// Arguments are the peer name and the fault description (`None` for a clean
/// close). The callback owns its own error handling; emission never awaits
/// its outcome beyond completion.
pub type DisconnectFn =
    Arc<dyn Fn(String, Option<String>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Establishes one connection attempt end-to-end.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// The handle type a successful attempt produces.
    type Link: PeerLink + Clone + Send + Sync + 'static;

    /// Dial `peer` once: validate its configuration, build the transport,
    /// perform the handshake, and return the ready handle. `on_disconnect`
    /// must be wired to the handle's terminal events before the first
    /// suspension that could emit one.
    async fn dial(&self, peer: &str, on_disconnect: DisconnectFn) -> Result<Self::Link, Error>;
}

/// Production dialer: registry lookup, transport factory, session handshake.
#[derive(Debug)]
pub struct PeerDialer {
    registry: Arc<PeerRegistry>,
    factory: Arc<dyn TransportFactory>,
    client_version: String,
}

impl PeerDialer {
    /// Create a dialer over the standard transport factory.
    pub fn new(registry: PeerRegistry) -> Self {
        Self::with_factory(registry, Arc::new(StandardTransportFactory))
    }

    /// Create a dialer with a custom transport factory.
    pub fn with_factory(registry: PeerRegistry, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            registry: Arc::new(registry),
            factory,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// The registry this dialer resolves peers against.
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }
}

#[async_trait]
impl Dialer for PeerDialer {
    type Link = PeerSession;

    async fn dial(&self, peer: &str, on_disconnect: DisconnectFn) -> Result<PeerSession, Error> {
        // All configuration validation happens before the factory is
        // consulted; no process or network resource exists on these paths.
        let config = self.registry.get(peer)?;
        if config.disabled {
            return Err(ConfigError::Disabled(peer.to_string()).into());
        }
        let binding = config.binding(peer)?;

        let transport = self
            .factory
            .create(&binding)
            .map_err(|e| ConfigError::InvalidPeer {
                peer: peer.to_string(),
                reason: e.to_string(),
            })?;

        let identity = ClientInfo {
            name: format!("{peer}-client"),
            version: self.client_version.clone(),
        };
        let (session, mut events) = PeerSession::new(peer, transport, identity);

        // Watch for terminal events before connecting so nothing emitted
        // during or after the handshake can be missed.
        let watched = peer.to_string();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let fault = match event {
                    SessionEvent::ProtocolError(message) => {
                        warn!(peer = %watched, "session protocol error: {message}");
                        Some(message)
                    }
                    SessionEvent::TransportError(error) => {
                        warn!(peer = %watched, "session transport error: {error}");
                        Some(error.to_string())
                    }
                    SessionEvent::Closed => {
                        debug!(peer = %watched, "session closed by peer");
                        None
                    }
                };
                (*on_disconnect)(watched.clone(), fault).await;
            }
        });

        debug!(peer = %peer, kind = %binding.kind(), "dialing peer");
        if let Err(e) = session.connect().await {
            // Release whatever the partial connect acquired (child process,
            // read loop) before surfacing the failure.
            if let Err(close_err) = session.close().await {
                debug!(peer = %peer, "cleanup after failed connect: {close_err}");
            }
            return Err(Error::initialization(peer, e));
        }
        Ok(session)
    }
}
