//! Error types for the SSE tool client.
//!
//! Errors are split by layer so callers can tell a dead connection apart
//! from a tool server that answered with a JSON-RPC error:
//!
//! - [`FramingError`] - the event stream did not follow the `event:`/`data:` grammar
//! - [`TransportError`] - HTTP failures and unexpected status codes
//! - [`ClientError`] - everything a caller of [`crate::Client`] can observe

use std::time::Duration;

use thiserror::Error;

use crate::messages::ResponseError;

/// Result type alias using [`ClientError`].
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors raised while decoding the server-push stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// A line that is not part of the accepted grammar.
    #[error("malformed event line: {0:?}")]
    Malformed(String),

    /// Fields arrived in the wrong order or were repeated within a block.
    #[error("out-of-order event field: {0}")]
    OutOfOrder(&'static str),

    /// A block was terminated before both `event:` and `data:` were seen.
    #[error("incomplete event block: missing {0}")]
    Incomplete(&'static str),

    /// Buffered input grew past the configured limit without completing a block.
    #[error("event exceeds maximum size of {limit} bytes")]
    Oversized {
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The stream carried bytes that are not UTF-8.
    #[error("event stream is not valid UTF-8")]
    InvalidUtf8,
}

/// Errors raised by a [`crate::transport::Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection or protocol failure inside the HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a status other than the one the protocol requires.
    #[error("expected status code {expected} but got {actual}")]
    UnexpectedStatus {
        /// Status the protocol requires.
        expected: u16,
        /// Status the server returned.
        actual: u16,
    },

    /// The base address or the discovered endpoint does not form a valid URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A configured header name or value is not valid HTTP.
    #[error("invalid header {0:?}")]
    InvalidHeader(String),

    /// No `endpoint` event arrived within the configured wait.
    #[error("endpoint was not announced within {0:?}")]
    EndpointTimeout(Duration),

    /// `send` was called before `start`.
    #[error("transport not started")]
    NotStarted,

    /// `start` was called on a transport that is already running.
    #[error("transport already started")]
    AlreadyStarted,

    /// The event stream ended before an endpoint was announced.
    #[error("event stream closed")]
    Closed,

    /// The request could not be encoded.
    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors surfaced to callers of [`crate::Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Starting the transport or sending a request failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The receive loop terminated while the request was outstanding.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// No response arrived before the per-call deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation token fired while waiting.
    #[error("request cancelled")]
    Cancelled,

    /// The server answered with a JSON-RPC error.
    #[error("server error {code}: {message}")]
    Server {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
        /// Optional additional data
        data: Option<serde_json::Value>,
    },

    /// The response did not have the shape the operation expects.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// A second waiter tried to register for an id that already has one.
    #[error("a waiter is already registered for request {0}")]
    AlreadyWaiting(u64),

    /// An operation other than `connect` was called before `connect`.
    #[error("client is not connected")]
    NotConnected,

    /// `connect` was called twice on the same client.
    #[error("client is already connected")]
    AlreadyConnected,
}

impl From<ResponseError> for ClientError {
    fn from(err: ResponseError) -> Self {
        ClientError::Server {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

impl ClientError {
    /// The remote error code, for [`ClientError::Server`] failures.
    pub fn server_code(&self) -> Option<i64> {
        match self {
            ClientError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_display() {
        let timeout_err = ClientError::Timeout(Duration::from_secs(30));
        assert_eq!(timeout_err.to_string(), "request timed out after 30s");

        let server_err = ClientError::Server {
            code: -32601,
            message: "method not found".to_string(),
            data: None,
        };
        assert_eq!(server_err.to_string(), "server error -32601: method not found");

        let status_err = ClientError::from(TransportError::UnexpectedStatus {
            expected: 202,
            actual: 500,
        });
        assert_eq!(
            status_err.to_string(),
            "transport error: expected status code 202 but got 500"
        );
    }

    #[test]
    fn test_client_error_from_response_error() {
        let rpc_err = ResponseError {
            code: -32602,
            message: "Invalid params".to_string(),
            data: Some(serde_json::json!({"field": "name"})),
        };

        let err: ClientError = rpc_err.into();
        match err {
            ClientError::Server { code, message, data } => {
                assert_eq!(code, -32602);
                assert_eq!(message, "Invalid params");
                assert!(data.is_some());
            }
            other => panic!("Expected Server error, got {:?}", other),
        }
    }

    #[test]
    fn test_server_code_only_for_server_errors() {
        let err = ClientError::Server {
            code: -32000,
            message: "boom".to_string(),
            data: None,
        };
        assert_eq!(err.server_code(), Some(-32000));
        assert_eq!(ClientError::Cancelled.server_code(), None);
    }
}
