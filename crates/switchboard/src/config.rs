//! Peer registry: the JSON configuration file naming remote peers.
//!
//! The file is read and validated once at load time and served from memory
//! afterwards. Format:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "files": {"command": "/usr/local/bin/files-server", "args": ["--root", "/srv"]},
//!     "search": {"transportType": "http", "command": "https://search.internal/mcp"}
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use switchboard_transport::{TransportBinding, TransportKind};

/// Represents errors raised while loading or querying the peer registry.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ConfigError {
    /// The registry file could not be read.
    #[error("failed to read registry '{path}': {reason}")]
    Read {
        /// Path that was read.
        path: String,
        /// Underlying I/O failure.
        reason: String,
    },

    /// The registry file is not valid JSON or not the expected shape.
    #[error("failed to parse registry '{path}': {reason}")]
    Parse {
        /// Path (or label) of the document.
        path: String,
        /// Underlying parse failure.
        reason: String,
    },

    /// No peer with the requested name is configured.
    #[error("peer '{0}' is not configured")]
    MissingPeer(String),

    /// A configured entry is structurally invalid.
    #[error("peer '{peer}' has an invalid configuration: {reason}")]
    InvalidPeer {
        /// Peer name.
        peer: String,
        /// What is wrong with the entry.
        reason: String,
    },

    /// The peer is configured but marked disabled.
    #[error("peer '{0}' is disabled")]
    Disabled(String),
}

fn default_transport_kind() -> TransportKind {
    TransportKind::Stdio
}

/// One named peer entry.
///
/// The `command` field is overloaded at the file-format boundary: an
/// executable path for stdio peers, a base URL for http peers. Use
/// [`PeerConfig::binding`] to obtain the kind-gated internal form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PeerConfig {
    /// Executable path (stdio) or base URL (http).
    pub command: String,
    /// Arguments passed to the child process. Ignored for http peers.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment entries merged over the base allow-list. Ignored for
    /// http peers.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Which transport the peer speaks.
    #[serde(default = "default_transport_kind")]
    pub transport_type: TransportKind,
    /// Disabled peers stay in the file but refuse connections.
    #[serde(default)]
    pub disabled: bool,
    /// Advisory flag for callers that gate tool invocations. Never
    /// interpreted by the lifecycle core.
    #[serde(default)]
    pub auto_approve: bool,
}

impl PeerConfig {
    /// Produce the validated transport binding for this entry.
    ///
    /// All binding-level validation happens here, before any process or
    /// network resource exists.
    pub fn binding(&self, peer: &str) -> Result<TransportBinding, ConfigError> {
        match self.transport_type {
            TransportKind::Stdio => Ok(TransportBinding::Stdio {
                command: self.command.clone(),
                args: self.args.clone(),
                env: self.env.clone(),
            }),
            TransportKind::Http => {
                let base_url = Url::parse(&self.command).map_err(|e| ConfigError::InvalidPeer {
                    peer: peer.to_string(),
                    reason: format!("invalid base URL '{}': {e}", self.command),
                })?;
                if !matches!(base_url.scheme(), "http" | "https") {
                    return Err(ConfigError::InvalidPeer {
                        peer: peer.to_string(),
                        reason: format!("unsupported URL scheme '{}'", base_url.scheme()),
                    });
                }
                Ok(TransportBinding::Http { base_url })
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(rename = "mcpServers")]
    mcp_servers: BTreeMap<String, PeerConfig>,
}

/// In-memory view of the peer configuration file.
///
/// Loaded once; lookups are served from the parsed table for the process
/// lifetime. Edits to the file after load are not observed.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    peers: BTreeMap<String, PeerConfig>,
}

impl PeerRegistry {
    /// Load and validate the registry from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let label = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: label.clone(),
            reason: e.to_string(),
        })?;
        Self::parse(&contents, &label)
    }

    /// Parse a registry from an in-memory JSON document.
    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        Self::parse(contents, "<inline>")
    }

    /// Build a registry directly from peer entries. Entries are validated the
    /// same way file loads are.
    pub fn from_peers(
        peers: impl IntoIterator<Item = (String, PeerConfig)>,
    ) -> Result<Self, ConfigError> {
        let registry = Self {
            peers: peers.into_iter().collect(),
        };
        registry.validate()?;
        Ok(registry)
    }

    fn parse(contents: &str, label: &str) -> Result<Self, ConfigError> {
        let file: RegistryFile =
            serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                path: label.to_string(),
                reason: e.to_string(),
            })?;
        let registry = Self {
            peers: file.mcp_servers,
        };
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, config) in &self.peers {
            if config.command.trim().is_empty() {
                return Err(ConfigError::InvalidPeer {
                    peer: name.clone(),
                    reason: "command must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Look up a peer entry by name, returning a defensive clone.
    pub fn get(&self, name: &str) -> Result<PeerConfig, ConfigError> {
        self.peers
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::MissingPeer(name.to_string()))
    }

    /// All configured peer names, in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    /// Number of configured peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write as _;

    const SAMPLE: &str = r#"{
        "mcpServers": {
            "files": {
                "command": "/usr/local/bin/files-server",
                "args": ["--root", "/srv"],
                "env": {"FILES_LOG": "debug"}
            },
            "search": {
                "transportType": "http",
                "command": "https://search.internal/mcp"
            },
            "legacy": {
                "command": "legacy-server",
                "disabled": true,
                "autoApprove": true
            }
        }
    }"#;

    #[test]
    fn test_parse_with_defaults() {
        let registry = PeerRegistry::from_json_str(SAMPLE).unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.names(), vec!["files", "legacy", "search"]);

        let files = registry.get("files").unwrap();
        assert_eq!(files.transport_type, TransportKind::Stdio);
        assert_eq!(files.args, vec!["--root", "/srv"]);
        assert!(!files.disabled);
        assert!(!files.auto_approve);

        let legacy = registry.get("legacy").unwrap();
        assert!(legacy.disabled);
        assert!(legacy.auto_approve);
        assert!(legacy.args.is_empty());
        assert!(legacy.env.is_empty());
    }

    #[test]
    fn test_missing_peer() {
        let registry = PeerRegistry::from_json_str(SAMPLE).unwrap();
        let err = registry.get("nope").unwrap_err();
        assert!(matches!(err, ConfigError::MissingPeer(name) if name == "nope"));
    }

    #[test]
    fn test_unknown_transport_type_rejected() {
        let err = PeerRegistry::from_json_str(
            r#"{"mcpServers": {"x": {"command": "x", "transportType": "carrier-pigeon"}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "{err:?}");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = PeerRegistry::from_json_str(
            r#"{"mcpServers": {"x": {"command": "x", "retries": 3}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "{err:?}");
    }

    #[test]
    fn test_empty_command_rejected_at_load() {
        let err =
            PeerRegistry::from_json_str(r#"{"mcpServers": {"x": {"command": "  "}}}"#).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidPeer { peer, .. } if peer == "x"),
            "expected invalid peer"
        );
    }

    #[test]
    fn test_stdio_binding() {
        let registry = PeerRegistry::from_json_str(SAMPLE).unwrap();
        let binding = registry.get("files").unwrap().binding("files").unwrap();
        match binding {
            TransportBinding::Stdio { command, args, env } => {
                assert_eq!(command, "/usr/local/bin/files-server");
                assert_eq!(args, vec!["--root", "/srv"]);
                assert_eq!(env.get("FILES_LOG").map(String::as_str), Some("debug"));
            }
            other => panic!("unexpected binding: {other:?}"),
        }
    }

    #[test]
    fn test_http_binding_requires_valid_absolute_url() {
        let registry = PeerRegistry::from_json_str(
            r#"{"mcpServers": {"bad": {"transportType": "http", "command": "not a url"}}}"#,
        )
        .unwrap();
        let err = registry.get("bad").unwrap().binding("bad").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPeer { peer, .. } if peer == "bad"));
    }

    #[test]
    fn test_http_binding_rejects_non_http_scheme() {
        let registry = PeerRegistry::from_json_str(
            r#"{"mcpServers": {"bad": {"transportType": "http", "command": "ftp://host/mcp"}}}"#,
        )
        .unwrap();
        let err = registry.get("bad").unwrap().binding("bad").unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidPeer { ref reason, .. } if reason.contains("scheme")),
            "{err:?}"
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let registry = PeerRegistry::load(file.path()).unwrap();
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_load_missing_file() {
        let err = PeerRegistry::load("/nonexistent/peers.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }), "{err:?}");
    }

    #[test]
    fn test_load_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"mcpServers\": {").unwrap();
        let err = PeerRegistry::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "{err:?}");
    }
}
