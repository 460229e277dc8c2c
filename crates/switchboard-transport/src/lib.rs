//! # Switchboard Transport
//!
//! Transport bindings for the switchboard connection manager. A transport carries
//! newline-delimited JSON frames to a single named peer over one of two mechanisms:
//!
//! - **Stdio**: a spawned child process, framed over its stdin/stdout pipes
//! - **Http**: a streamable-HTTP endpoint (JSON or SSE response bodies)
//!
//! Construction is always resource-free: a transport acquires its process or
//! network resources only when [`Transport::connect`] is called, and all
//! configuration validation happens before that point.
//!
//! ## Overview
//!
//! - **Traits**: [`Transport`], [`TransportFactory`]
//! - **Types**: [`TransportKind`], [`TransportState`], [`TransportBinding`], [`Frame`]
//! - **Errors**: [`TransportError`], [`TransportResult`]
//! - **Events**: [`TransportEvent`], [`TransportEventEmitter`]

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
mod events;
mod factory;
mod frame;
mod http;
mod stdio;
mod traits;
mod types;

pub use error::{TransportError, TransportResult};
pub use events::{TransportEvent, TransportEventEmitter};
pub use factory::{StandardTransportFactory, TransportBinding, TransportFactory};
pub use frame::Frame;
pub use http::HttpTransport;
pub use stdio::StdioTransport;
pub use traits::Transport;
pub use types::{TransportKind, TransportState};
