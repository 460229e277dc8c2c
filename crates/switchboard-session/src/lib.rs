//! # Switchboard Session
//!
//! Peer sessions for the switchboard connection manager. A [`PeerSession`] is
//! the "connected peer handle" the lifecycle core hands out: it owns a
//! transport, runs the initialize handshake, correlates requests with
//! responses through a background read loop, and reports terminal conditions
//! (protocol errors, transport errors, clean close) as [`SessionEvent`]s.
//!
//! The core consumes sessions through the [`PeerLink`] trait so tests can
//! substitute doubles without a real transport.

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

mod error;
mod link;
mod session;
mod wire;

pub use error::SessionError;
pub use link::PeerLink;
pub use session::{PeerSession, SessionEvent};
pub use wire::{
    CallToolResult, ClientCapabilities, ClientInfo, InitializeResult, ListToolsResult,
    PROTOCOL_VERSION, ServerInfo, Tool,
};
