//! MCP SSE Client Library
//!
//! An async client for tool servers that speak JSON-RPC 2.0 over a
//! Server-Sent Events stream:
//!
//! - `transport` - opens the event stream, decodes it, POSTs requests
//! - `client` - request ids, response correlation, `list_tools` / `call_tool`
//! - `messages` - JSON-RPC envelopes
//! - `models` - tool and tool-call records
//! - `config` - connection settings
//!
//! # Protocol
//!
//! ```text
//! GET  <base_url>                  ──► 200, text/event-stream
//!      event: endpoint / data: /messages?session_id=...
//! POST <base_url><endpoint>  {"jsonrpc":"2.0","id":1,"method":"initialize",...}  ──► 202
//!      event: message  / data: {"jsonrpc":"2.0","id":1,"result":{...}}
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use mcp_sse_client::{Client, ClientConfig};
//! use serde_json::json;
//!
//! let config = ClientConfig::new("http://localhost:8777").with_bearer_token("abcd");
//! let client = Client::connect_sse(&config).await?;
//! let tools = client.list_tools().await?;
//! let content = client.call_tool("query", json!({"query": "SELECT 1"})).await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod models;
pub mod transport;

pub use client::{CallOptions, Client};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult, FramingError, TransportError};
pub use messages::{Request, Response, ResponseError};
pub use models::{ClientInfo, Tool, ToolContent};
pub use transport::{SseTransport, Transport};
