//! # Switchboard
//!
//! Connection lifecycle manager for named protocol peers. Given a JSON
//! registry of peer definitions, a [`Switchboard`] establishes, caches,
//! deduplicates, and tears down outbound connections:
//!
//! - `connect(name)` returns the cached handle, joins an in-flight attempt,
//!   or starts exactly one new attempt per peer.
//! - `disconnect(name)` is idempotent and races the handle's close against a
//!   bounded timeout.
//! - Session failures reported by a peer trigger the same cleanup path.
//!
//! ```no_run
//! use switchboard::{PeerRegistry, Switchboard};
//!
//! # async fn run() -> Result<(), switchboard::Error> {
//! let registry = PeerRegistry::load("peers.json")?;
//! let board = Switchboard::standard(registry);
//! let session = board.connect("files").await?;
//! let tools = session.list_tools().await;
//! board.disconnect_all().await;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod board;
mod cache;
mod config;
mod dial;
mod error;

pub use board::{PeerStatus, Switchboard, SwitchboardConfig};
pub use cache::{Claim, ConnectFuture, ConnectionCache, TakenEntry};
pub use config::{ConfigError, PeerConfig, PeerRegistry};
pub use dial::{Dialer, DisconnectFn, PeerDialer};
pub use error::Error;

// The session-layer surface callers interact with through handles.
pub use switchboard_session::{PeerLink, PeerSession, SessionError};

/// Convenience result alias for switchboard operations.
pub type Result<T> = std::result::Result<T, Error>;
