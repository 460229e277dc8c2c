//! Transport bindings and the factory that turns them into transports.

use std::collections::HashMap;

use url::Url;

use crate::error::TransportResult;
use crate::http::HttpTransport;
use crate::stdio::StdioTransport;
use crate::traits::Transport;
use crate::types::TransportKind;

/// A validated, kind-gated description of how to reach one peer.
///
/// Bindings are produced from peer configuration before any transport is
/// constructed, so each variant only carries the fields its kind needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportBinding {
    /// Spawn a local process and frame over its stdio pipes.
    Stdio {
        /// Executable to spawn.
        command: String,
        /// Arguments passed to the executable.
        args: Vec<String>,
        /// Explicitly configured environment entries for the child.
        env: HashMap<String, String>,
    },
    /// Streamable HTTP against an absolute base URL.
    Http {
        /// Validated absolute http/https URL.
        base_url: Url,
    },
}

impl TransportBinding {
    /// The transport kind this binding produces.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::Http { .. } => TransportKind::Http,
        }
    }
}

/// A factory for constructing not-yet-connected transports from bindings.
pub trait TransportFactory: Send + Sync + std::fmt::Debug {
    /// Creates a new transport for the given binding.
    ///
    /// All validation is synchronous and happens before any process or
    /// network resource is acquired.
    fn create(&self, binding: &TransportBinding) -> TransportResult<Box<dyn Transport>>;
}

/// The production factory covering both supported transport kinds.
#[derive(Debug, Default)]
pub struct StandardTransportFactory;

impl StandardTransportFactory {
    /// Create a new factory.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TransportFactory for StandardTransportFactory {
    fn create(&self, binding: &TransportBinding) -> TransportResult<Box<dyn Transport>> {
        match binding {
            TransportBinding::Stdio { command, args, env } => {
                let transport = StdioTransport::new(command.clone(), args.clone(), env.clone())?;
                Ok(Box::new(transport))
            }
            TransportBinding::Http { base_url } => {
                Ok(Box::new(HttpTransport::new(base_url.clone())))
            }
        }
    }
}
