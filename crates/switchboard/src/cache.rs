//! Connection cache: the shared state behind connect deduplication.
//!
//! Two maps under one lock: settled connections and in-flight attempts. Every
//! public operation is a single synchronous critical section; the lock is
//! never held across an `.await`. Atomicity of `claim` and `resolve` is what
//! makes deduplication race-free on a multi-threaded runtime: a peer name is
//! never observable in both maps, and two callers can never both start an
//! attempt for the same name.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use futures::future::{BoxFuture, Shared};

use crate::error::Error;

/// An in-flight connection attempt, awaitable by any number of callers.
pub type ConnectFuture<L> = Shared<BoxFuture<'static, Result<L, Error>>>;

/// Outcome of an atomic cache claim for one peer name.
pub enum Claim<L> {
    /// The peer is already connected; use this handle.
    Connected(L),
    /// Another caller's attempt is in flight; await this shared future.
    Joined(ConnectFuture<L>),
    /// The caller now owns the only attempt slot for this peer. The returned
    /// future was registered before this call returned, so concurrent
    /// claimers join instead of dialing again.
    Claimed(ConnectFuture<L>),
}

impl<L> std::fmt::Debug for Claim<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected(_) => write!(f, "Claim::Connected"),
            Self::Joined(_) => write!(f, "Claim::Joined"),
            Self::Claimed(_) => write!(f, "Claim::Claimed"),
        }
    }
}

/// Whatever the cache held for a peer, removed for teardown.
pub enum TakenEntry<L> {
    /// The peer had a settled handle.
    Connected(L),
    /// The peer had an in-flight attempt.
    Pending(ConnectFuture<L>),
}

impl<L> std::fmt::Debug for TakenEntry<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected(_) => write!(f, "TakenEntry::Connected"),
            Self::Pending(_) => write!(f, "TakenEntry::Pending"),
        }
    }
}

struct Maps<L> {
    connected: HashMap<String, L>,
    pending: HashMap<String, ConnectFuture<L>>,
}

/// Caches settled connections and deduplicates in-flight attempts.
pub struct ConnectionCache<L> {
    inner: StdMutex<Maps<L>>,
}

impl<L> std::fmt::Debug for ConnectionCache<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let maps = self.inner.lock().expect("cache mutex poisoned");
        f.debug_struct("ConnectionCache")
            .field("connected", &maps.connected.len())
            .field("pending", &maps.pending.len())
            .finish()
    }
}

impl<L: Clone> Default for ConnectionCache<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Clone> ConnectionCache<L> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            inner: StdMutex::new(Maps {
                connected: HashMap::new(),
                pending: HashMap::new(),
            }),
        }
    }

    /// The settled handle for `name`, if connected.
    pub fn connected(&self, name: &str) -> Option<L> {
        self.inner
            .lock()
            .expect("cache mutex poisoned")
            .connected
            .get(name)
            .cloned()
    }

    /// Atomically look up `name` or register a new attempt.
    ///
    /// `make_pending` runs inside the critical section and must not block;
    /// it is only called when neither map holds the name.
    pub fn claim(
        &self,
        name: &str,
        make_pending: impl FnOnce() -> ConnectFuture<L>,
    ) -> Claim<L> {
        let mut maps = self.inner.lock().expect("cache mutex poisoned");
        if let Some(handle) = maps.connected.get(name) {
            return Claim::Connected(handle.clone());
        }
        if let Some(pending) = maps.pending.get(name) {
            return Claim::Joined(pending.clone());
        }
        let pending = make_pending();
        maps.pending.insert(name.to_string(), pending.clone());
        Claim::Claimed(pending)
    }

    /// Atomically settle the attempt registered under `name`.
    ///
    /// Removes the pending entry and, on success, installs the handle as
    /// connected. Returns `false` when the attempt was no longer registered
    /// (a disconnect or shutdown cleared it first); in that case the handle
    /// is *not* installed and the caller owns its cleanup.
    pub fn resolve(&self, name: &str, outcome: Option<L>) -> bool {
        let mut maps = self.inner.lock().expect("cache mutex poisoned");
        if maps.pending.remove(name).is_none() {
            return false;
        }
        if let Some(handle) = outcome {
            maps.connected.insert(name.to_string(), handle);
        }
        true
    }

    /// Atomically remove whatever the cache holds for `name`.
    ///
    /// Both maps are checked in one critical section, so an attempt resolving
    /// concurrently cannot slip between the checks: a teardown either takes
    /// the settled handle, or takes the pending attempt (whose own `resolve`
    /// then observes a cleared registration), or finds nothing.
    pub fn take_entry(&self, name: &str) -> Option<TakenEntry<L>> {
        let mut maps = self.inner.lock().expect("cache mutex poisoned");
        if let Some(handle) = maps.connected.remove(name) {
            return Some(TakenEntry::Connected(handle));
        }
        maps.pending.remove(name).map(TakenEntry::Pending)
    }

    /// Remove and return the settled handle for `name`.
    pub fn remove_connected(&self, name: &str) -> Option<L> {
        self.inner
            .lock()
            .expect("cache mutex poisoned")
            .connected
            .remove(name)
    }

    /// Remove and return the in-flight attempt for `name`.
    pub fn take_pending(&self, name: &str) -> Option<ConnectFuture<L>> {
        self.inner
            .lock()
            .expect("cache mutex poisoned")
            .pending
            .remove(name)
    }

    /// Whether an attempt for `name` is in flight.
    pub fn is_pending(&self, name: &str) -> bool {
        self.inner
            .lock()
            .expect("cache mutex poisoned")
            .pending
            .contains_key(name)
    }

    /// Names of all settled connections.
    pub fn connected_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("cache mutex poisoned")
            .connected
            .keys()
            .cloned()
            .collect()
    }

    /// Number of settled connections.
    pub fn connected_count(&self) -> usize {
        self.inner
            .lock()
            .expect("cache mutex poisoned")
            .connected
            .len()
    }

    /// Number of in-flight attempts.
    pub fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .expect("cache mutex poisoned")
            .pending
            .len()
    }

    /// Drop both maps unconditionally.
    pub fn clear(&self) {
        let mut maps = self.inner.lock().expect("cache mutex poisoned");
        maps.connected.clear();
        maps.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;

    fn ready_attempt(handle: &str) -> ConnectFuture<String> {
        let handle = handle.to_string();
        async move { Ok(handle) }.boxed().shared()
    }

    #[test]
    fn test_claim_registers_then_joins() {
        let cache = ConnectionCache::new();

        let first = cache.claim("files", || ready_attempt("h1"));
        assert!(matches!(first, Claim::Claimed(_)));
        assert_eq!(cache.pending_count(), 1);

        let second = cache.claim("files", || panic!("attempt slot already taken"));
        let Claim::Joined(fut) = second else {
            panic!("expected to join the in-flight attempt");
        };
        assert_eq!(block_on(fut).unwrap(), "h1");
    }

    #[test]
    fn test_resolve_settles_into_connected() {
        let cache = ConnectionCache::new();
        cache.claim("files", || ready_attempt("h1"));

        assert!(cache.resolve("files", Some("h1".to_string())));
        assert_eq!(cache.pending_count(), 0);
        assert_eq!(cache.connected("files"), Some("h1".to_string()));

        let claim = cache.claim("files", || panic!("connected peers never redial"));
        assert!(matches!(claim, Claim::Connected(h) if h == "h1"));
    }

    #[test]
    fn test_resolve_failure_leaves_no_entry() {
        let cache = ConnectionCache::<String>::new();
        cache.claim("files", || ready_attempt("h1"));

        assert!(cache.resolve("files", None));
        assert_eq!(cache.pending_count(), 0);
        assert_eq!(cache.connected_count(), 0);
    }

    #[test]
    fn test_resolve_after_pending_cleared_reports_orphan() {
        let cache = ConnectionCache::new();
        cache.claim("files", || ready_attempt("h1"));

        assert!(cache.take_pending("files").is_some());
        // The attempt settles after a disconnect cleared its slot: the
        // handle must not be installed.
        assert!(!cache.resolve("files", Some("h1".to_string())));
        assert_eq!(cache.connected_count(), 0);
    }

    #[test]
    fn test_remove_connected_and_clear() {
        let cache = ConnectionCache::new();
        cache.claim("a", || ready_attempt("ha"));
        cache.resolve("a", Some("ha".to_string()));
        cache.claim("b", || ready_attempt("hb"));

        assert_eq!(cache.remove_connected("a"), Some("ha".to_string()));
        assert_eq!(cache.remove_connected("a"), None);

        cache.clear();
        assert_eq!(cache.connected_count(), 0);
        assert_eq!(cache.pending_count(), 0);
    }

    #[test]
    fn test_default_cache_is_empty() {
        let cache: ConnectionCache<String> = ConnectionCache::default();
        assert_eq!(cache.connected_count(), 0);
        assert_eq!(cache.pending_count(), 0);
    }

    #[test]
    fn test_take_entry_returns_settled_handle() {
        let cache = ConnectionCache::new();
        cache.claim("files", || ready_attempt("h1"));
        cache.resolve("files", Some("h1".to_string()));

        let taken = cache.take_entry("files");
        assert!(matches!(taken, Some(TakenEntry::Connected(h)) if h == "h1"));
        assert!(cache.take_entry("files").is_none());
        assert_eq!(cache.connected_count(), 0);
    }

    #[test]
    fn test_take_entry_returns_inflight_attempt() {
        let cache = ConnectionCache::new();
        cache.claim("files", || ready_attempt("h1"));

        let taken = cache.take_entry("files");
        assert!(matches!(taken, Some(TakenEntry::Pending(_))));
        // The attempt's own settle path now sees a cleared registration.
        assert!(!cache.resolve("files", Some("h1".to_string())));
        assert_eq!(cache.connected_count(), 0);
    }

    #[test]
    fn test_connected_names_sorted_snapshot() {
        let cache = ConnectionCache::new();
        for name in ["b", "a"] {
            cache.claim(name, || ready_attempt(name));
            cache.resolve(name, Some(name.to_string()));
        }
        let mut names = cache.connected_names();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }
}
