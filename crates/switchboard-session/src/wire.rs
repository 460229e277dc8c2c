//! Wire types for the session's JSON-RPC slice.
//!
//! Only the envelopes and payloads a peer handle actually exchanges are
//! modelled here: the initialize handshake, ping, and the tool operations.
//! Request ids are plain `u64`s generated by the session; everything else the
//! peer sends is routed or logged by the read loop without a typed model.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Protocol revision this client speaks.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// JSON-RPC version marker, serialized as the literal `"2.0"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == "2.0" {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "invalid JSON-RPC version: expected '2.0', got '{version}'"
            )))
        }
    }
}

/// An outbound JSON-RPC request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: u64,
}

/// An outbound JSON-RPC notification (no response expected).
#[derive(Debug, Clone, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Response payload - mutual exclusion of result and error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum ResponsePayload {
    /// Successful response.
    Success {
        /// Response result.
        result: Value,
    },
    /// Error response.
    Error {
        /// Response error.
        error: RpcError,
    },
}

/// An inbound JSON-RPC response.
///
/// The id is `None` only for parse-error responses, which cannot be routed to
/// a waiter.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Response {
    #[allow(dead_code)]
    pub jsonrpc: JsonRpcVersion,
    #[serde(flatten)]
    pub payload: ResponsePayload,
    pub id: Option<u64>,
}

/// The identity descriptor sent during the initialize handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name, derived from the peer name.
    pub name: String,
    /// Client version string.
    pub version: String,
}

/// Client capabilities advertised during the handshake.
///
/// This process consumes peers; it offers no server-facing features, so the
/// capability set is fixed and empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCapabilities {}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

/// Identity the peer reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Peer-reported server name.
    pub name: String,
    /// Peer-reported server version.
    pub version: String,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol revision the peer settled on.
    pub protocol_version: String,
    /// Peer capabilities, kept opaque: the handle does not negotiate beyond
    /// the initialize exchange.
    #[serde(default)]
    pub capabilities: Value,
    /// Peer identity.
    pub server_info: ServerInfo,
    /// Optional usage instructions from the peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// One tool advertised by a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for the tool's arguments.
    #[serde(default)]
    pub input_schema: Value,
}

/// Result of `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    /// Tools advertised by the peer.
    #[serde(default)]
    pub tools: Vec<Tool>,
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content blocks produced by the tool, kept opaque.
    #[serde(default)]
    pub content: Value,
    /// Whether the tool reported a domain-level failure.
    #[serde(default)]
    pub is_error: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_serialization() {
        let request = Request {
            jsonrpc: JsonRpcVersion,
            method: "ping".to_string(),
            params: None,
            id: 7,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"jsonrpc":"2.0","method":"ping","id":7}));
    }

    #[test]
    fn test_initialize_params_are_camel_case() {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "github-client".to_string(),
                version: "0.3.0".to_string(),
            },
        };
        let json = serde_json::to_value(&params).unwrap();
        assert!(json.get("protocolVersion").is_some());
        assert!(json.get("clientInfo").is_some());
        assert_eq!(json["clientInfo"]["name"], "github-client");
    }

    #[test]
    fn test_response_success_deserialization() {
        let raw = r#"{"jsonrpc":"2.0","result":{"ok":true},"id":3}"#;
        let response: Response = serde_json::from_str(raw).unwrap();
        assert_eq!(response.id, Some(3));
        assert!(matches!(response.payload, ResponsePayload::Success { .. }));
    }

    #[test]
    fn test_response_error_deserialization() {
        let raw = r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"method not found"},"id":4}"#;
        let response: Response = serde_json::from_str(raw).unwrap();
        match response.payload {
            ResponsePayload::Error { error } => {
                assert_eq!(error.code, -32601);
                assert_eq!(error.message, "method not found");
            }
            ResponsePayload::Success { .. } => panic!("expected error payload"),
        }
    }

    #[test]
    fn test_response_rejects_wrong_version() {
        let raw = r#"{"jsonrpc":"1.0","result":{},"id":1}"#;
        assert!(serde_json::from_str::<Response>(raw).is_err());
    }

    #[test]
    fn test_initialize_result_deserialization() {
        let raw = r#"{
            "protocolVersion":"2025-06-18",
            "capabilities":{"tools":{}},
            "serverInfo":{"name":"files","version":"1.2.0"}
        }"#;
        let result: InitializeResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
        assert_eq!(result.server_info.name, "files");
        assert_eq!(result.instructions, None);
    }

    #[test]
    fn test_tool_input_schema_snake_to_camel() {
        let raw = r#"{"name":"search","inputSchema":{"type":"object"}}"#;
        let tool: Tool = serde_json::from_str(raw).unwrap();
        assert_eq!(tool.name, "search");
        assert_eq!(tool.input_schema["type"], "object");
    }
}
