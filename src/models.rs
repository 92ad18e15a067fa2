//! Records exchanged with the tool server.
//!
//! These structs mirror the shapes the server puts under `result` for
//! `tools/list` and `tools/call`. They use serde for JSON deserialization;
//! anything the server adds beyond these fields is ignored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ClientError;

/// A callable tool advertised by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's arguments, passed through opaquely.
    #[serde(rename = "inputSchema")]
    pub input_schema: Map<String, Value>,
}

/// One item of a tool call's `content` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Opaque payload (base64 for images and audio).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Name and version announced in the `initialize` handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Map<String, Value>,
    pub client_info: ClientInfo,
}

#[derive(Deserialize)]
struct ToolsListResult {
    tools: Vec<Tool>,
}

#[derive(Deserialize)]
struct ToolCallResult {
    content: Vec<ToolContent>,
}

/// Decode the `result` of a `tools/list` response.
pub fn decode_tools(result: Value) -> Result<Vec<Tool>, ClientError> {
    serde_json::from_value::<ToolsListResult>(result)
        .map(|r| r.tools)
        .map_err(|e| ClientError::Decode(format!("tools/list result: {}", e)))
}

/// Decode the `result` of a `tools/call` response.
pub fn decode_content(result: Value) -> Result<Vec<ToolContent>, ClientError> {
    serde_json::from_value::<ToolCallResult>(result)
        .map(|r| r.content)
        .map_err(|e| ClientError::Decode(format!("tools/call result: {}", e)))
}
