//! The orchestrator: connect, disconnect, and introspection over the cache.
//!
//! A [`Switchboard`] is cheap to clone; all clones share one cache and one
//! dialer. Connection attempts run as spawned tasks behind shared futures,
//! so an attempt makes progress even when every caller drops its `connect`
//! future, and every concurrent caller of the same peer observes the same
//! outcome.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use tracing::{debug, info, warn};

use switchboard_session::PeerLink;

use crate::cache::{Claim, ConnectFuture, ConnectionCache, TakenEntry};
use crate::config::PeerRegistry;
use crate::dial::{Dialer, DisconnectFn, PeerDialer};
use crate::error::Error;

/// Tuning knobs for the lifecycle core.
#[derive(Debug, Clone)]
pub struct SwitchboardConfig {
    /// Upper bound on how long a disconnect waits for a handle to close.
    pub close_timeout: Duration,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            close_timeout: Duration::from_millis(5000),
        }
    }
}

/// Lifecycle state of one peer as the cache sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    /// A settled handle is cached.
    Connected,
    /// An attempt is in flight.
    Connecting,
    /// Neither connected nor in flight.
    Disconnected,
}

struct BoardInner<D: Dialer> {
    dialer: D,
    cache: ConnectionCache<D::Link>,
    config: SwitchboardConfig,
}

/// Connection lifecycle manager for named peers.
pub struct Switchboard<D: Dialer> {
    inner: Arc<BoardInner<D>>,
}

impl<D: Dialer> Clone for Switchboard<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Dialer> std::fmt::Debug for Switchboard<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Switchboard")
            .field("cache", &self.inner.cache)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Switchboard<PeerDialer> {
    /// Build a switchboard over the production dialer with default tuning.
    pub fn standard(registry: PeerRegistry) -> Self {
        Self::new(PeerDialer::new(registry), SwitchboardConfig::default())
    }
}

impl<D: Dialer> Switchboard<D> {
    /// Build a switchboard over `dialer`.
    pub fn new(dialer: D, config: SwitchboardConfig) -> Self {
        Self {
            inner: Arc::new(BoardInner {
                dialer,
                cache: ConnectionCache::new(),
                config,
            }),
        }
    }

    /// Connect to `peer`, reusing the cached handle or joining an in-flight
    /// attempt. At most one attempt per peer is ever in flight; every caller
    /// that joins a failing attempt receives a clone of the same error.
    pub async fn connect(&self, peer: &str) -> Result<D::Link, Error> {
        match self.inner.cache.claim(peer, || self.spawn_attempt(peer)) {
            Claim::Connected(link) => {
                debug!(peer = %peer, "reusing cached connection");
                Ok(link)
            }
            Claim::Joined(attempt) => {
                debug!(peer = %peer, "joining in-flight connection attempt");
                attempt.await
            }
            Claim::Claimed(attempt) => attempt.await,
        }
    }

    /// Disconnect `peer`. Idempotent; errors and timeouts during close are
    /// logged, never surfaced.
    pub async fn disconnect(&self, peer: &str) {
        self.disconnect_with(peer, None).await;
    }

    /// Disconnect `peer`, recording the fault that triggered the teardown.
    pub async fn disconnect_with(&self, peer: &str, fault: Option<String>) {
        match &fault {
            Some(reason) => warn!(peer = %peer, "disconnecting after fault: {reason}"),
            None => debug!(peer = %peer, "disconnecting"),
        }

        // One atomic takeover of both maps, so an attempt resolving between
        // separate checks cannot turn this into a silent no-op.
        match self.inner.cache.take_entry(peer) {
            Some(TakenEntry::Connected(link)) => {
                // Removed before closing, so no caller can claim a closing
                // handle.
                self.close_link(peer, &link).await;
            }
            Some(TakenEntry::Pending(attempt)) => {
                // The slot is cleared, so the attempt's own settle path sees
                // an orphaned registration and cleans up after itself;
                // awaiting here only catches the case where it already
                // produced a handle.
                debug!(peer = %peer, "disconnect overtaking in-flight attempt");
                if let Ok(link) = attempt.await {
                    self.close_link(peer, &link).await;
                }
            }
            None => {
                debug!(peer = %peer, "disconnect of a peer that is not connected");
            }
        }
    }

    /// Disconnect every peer concurrently, then drop all cache state.
    pub async fn disconnect_all(&self) {
        let names = self.inner.cache.connected_names();
        info!(count = names.len(), "disconnecting all peers");
        join_all(names.iter().map(|name| self.disconnect(name))).await;
        // Covers attempts that were pending-only: their settle path observes
        // the cleared registration and closes any handle it produced.
        self.inner.cache.clear();
    }

    /// Names of currently connected peers, sorted.
    pub fn connected_peers(&self) -> Vec<String> {
        let mut names = self.inner.cache.connected_names();
        names.sort();
        names
    }

    /// Whether `peer` has a settled connection.
    pub fn is_connected(&self, peer: &str) -> bool {
        self.inner.cache.connected(peer).is_some()
    }

    /// Lifecycle state of `peer`.
    pub fn status(&self, peer: &str) -> PeerStatus {
        if self.inner.cache.connected(peer).is_some() {
            PeerStatus::Connected
        } else if self.inner.cache.is_pending(peer) {
            PeerStatus::Connecting
        } else {
            PeerStatus::Disconnected
        }
    }

    /// Spawn one eagerly-running connection attempt and wrap it for sharing.
    ///
    /// Called inside the cache's claim critical section; nothing here blocks
    /// or awaits.
    fn spawn_attempt(&self, peer: &str) -> ConnectFuture<D::Link> {
        let board = self.clone();
        let name = peer.to_string();
        let task = tokio::spawn(async move {
            let on_disconnect = board.disconnect_callback();
            match board.inner.dialer.dial(&name, on_disconnect).await {
                Ok(link) => {
                    if board.inner.cache.resolve(&name, Some(link.clone())) {
                        info!(peer = %name, "peer connected");
                        Ok(link)
                    } else {
                        // A disconnect or shutdown cleared the registration
                        // while the handshake ran; the handle must not leak.
                        warn!(peer = %name, "attempt settled after its registration was cleared");
                        board.close_link(&name, &link).await;
                        Err(Error::unavailable(
                            &name,
                            "connection attempt overtaken by disconnect",
                        ))
                    }
                }
                Err(e) => {
                    board.inner.cache.resolve(&name, None);
                    warn!(peer = %name, "connection attempt failed: {e}");
                    Err(e)
                }
            }
        });

        let name = peer.to_string();
        task.map(move |joined| match joined {
            Ok(outcome) => outcome,
            Err(e) => Err(Error::unavailable(
                &name,
                format!("connection task failed: {e}"),
            )),
        })
        .boxed()
        .shared()
    }

    /// The callback a dialed session uses to route terminal events back into
    /// the disconnect path.
    fn disconnect_callback(&self) -> DisconnectFn {
        let board = self.clone();
        Arc::new(move |peer, fault| {
            let board = board.clone();
            async move {
                board.disconnect_with(&peer, fault).await;
            }
            .boxed()
        })
    }

    /// Close a handle with the configured upper bound. Failures and timeouts
    /// are logged and absorbed.
    async fn close_link(&self, peer: &str, link: &D::Link) {
        let timeout = self.inner.config.close_timeout;
        match tokio::time::timeout(timeout, link.close()).await {
            Ok(Ok(())) => debug!(peer = %peer, "peer disconnected"),
            Ok(Err(e)) => warn!(peer = %peer, "close failed: {e}"),
            Err(_) => {
                let err = Error::Timeout {
                    peer: peer.to_string(),
                    operation: "close".to_string(),
                    timeout,
                };
                warn!(peer = %peer, "{err}");
            }
        }
    }
}
