//! JSON-RPC 2.0 envelopes exchanged with the tool server.
//!
//! Requests are POSTed as a JSON body; responses arrive as the payload of
//! `message` events on the server-push stream. Only the envelope is
//! interpreted here. `result` is carried opaquely and decoded by the
//! operation that asked for it (see [`crate::models`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol tag carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method names used by the client.
pub mod method {
    pub const INITIALIZE: &str = "initialize";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

/// Outgoing JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl Request {
    /// Build a request with the `"2.0"` version tag.
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Incoming JSON-RPC response.
///
/// When both `result` and `error` are present the error wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

impl Response {
    /// Build a success response. Mostly useful for tests and mock transports.
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn failure(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Split into the result or the remote error, error taking precedence.
    ///
    /// A response with neither field yields `Value::Null`.
    pub fn into_result(self) -> Result<Value, ResponseError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Decode the payload of a `message` event.
///
/// Returns `Ok(None)` for server-initiated notifications, which carry no
/// `id` and therefore have no caller to be routed to.
pub fn decode_message(payload: &str) -> Result<Option<Response>, serde_json::Error> {
    let value: Value = serde_json::from_str(payload)?;
    match value.get("id") {
        None | Some(Value::Null) => Ok(None),
        Some(_) => serde_json::from_value(value).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let request = Request::new(7, method::TOOLS_LIST, json!({}));
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(
            encoded,
            json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list", "params": {}})
        );
    }

    #[test]
    fn test_request_keeps_nested_params() {
        let params = json!({
            "name": "query",
            "arguments": {
                "query": "SELECT 1",
                "limits": [1, 2.5, null, {"deep": [true, false]}],
                "missing": null
            }
        });
        let request = Request::new(3, method::TOOLS_CALL, params.clone());
        let text = serde_json::to_string(&request).unwrap();
        let back: Request = serde_json::from_str(&text).unwrap();
        assert_eq!(back.params, params);
    }

    #[test]
    fn test_response_without_version_tag() {
        let response: Response =
            serde_json::from_str(r#"{"id":2,"result":{"tools":[]}}"#).unwrap();
        assert_eq!(response.jsonrpc, "2.0");
        assert_eq!(response.id, 2);
        assert_eq!(response.into_result().unwrap(), json!({"tools": []}));
    }

    #[test]
    fn test_error_takes_precedence_over_result() {
        let response: Response = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":4,"result":{"x":1},"error":{"code":-32601,"message":"method not found"}}"#,
        )
        .unwrap();
        let err = response.into_result().unwrap_err();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "method not found");
    }

    #[test]
    fn test_decode_message_skips_notifications() {
        let notification = r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#;
        assert_eq!(decode_message(notification).unwrap(), None);

        let null_id = r#"{"jsonrpc":"2.0","id":null,"result":{}}"#;
        assert_eq!(decode_message(null_id).unwrap(), None);

        let response = decode_message(r#"{"id":9,"result":{}}"#).unwrap().unwrap();
        assert_eq!(response.id, 9);
    }

    #[test]
    fn test_decode_message_rejects_bad_json() {
        assert!(decode_message("{not json").is_err());
        assert!(decode_message(r#"{"id":"abc","result":{}}"#).is_err());
    }
}
