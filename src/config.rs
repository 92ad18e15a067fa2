//! Client configuration.
//!
//! Settings can be built in code with the `with_*` setters or read from the
//! environment:
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `MCP_SSE_URL` | Base URL of the event stream (required) |
//! | `MCP_SSE_TOKEN` | Bearer token sent with every request |
//! | `MCP_REQUEST_TIMEOUT_SECS` | Per-request timeout, `0` disables it |
//! | `MCP_ENDPOINT_TIMEOUT_SECS` | How long `send` waits for the `endpoint` event |

use std::time::Duration;

use anyhow::{Context, Result};

use crate::models::ClientInfo;
use crate::transport::DEFAULT_MAX_EVENT_SIZE;

/// Protocol revision announced in `initialize`.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Settings shared by the transport and the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL; the stream is opened here and requests go to `base_url + endpoint`.
    pub base_url: String,
    /// Headers attached to the stream GET and every POST.
    pub headers: Vec<(String, String)>,
    pub client_info: ClientInfo,
    pub protocol_version: String,
    /// Deadline for each request, `None` to wait indefinitely.
    pub request_timeout: Option<Duration>,
    /// Deadline for the `endpoint` event, `None` to wait indefinitely.
    pub endpoint_timeout: Option<Duration>,
    /// Largest event block the stream decoder will buffer.
    pub max_event_size: usize,
}

impl ClientConfig {
    /// Defaults for a server at `base_url`: 30 second requests, no endpoint
    /// deadline, 16MB events, and this crate's name as the client info.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            headers: Vec::new(),
            client_info: ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            request_timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            endpoint_timeout: None,
            max_event_size: DEFAULT_MAX_EVENT_SIZE,
        }
    }

    /// Load configuration from `MCP_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `MCP_SSE_URL` is unset or a timeout is not a number.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url = lookup("MCP_SSE_URL").context("MCP_SSE_URL is not set")?;
        let mut config = Self::new(base_url);

        if let Some(token) = lookup("MCP_SSE_TOKEN") {
            config = config.with_bearer_token(token);
        }

        if let Some(secs) = lookup("MCP_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = parse_timeout(&secs)
                .with_context(|| format!("Invalid MCP_REQUEST_TIMEOUT_SECS value: {}", secs))?;
        }

        if let Some(secs) = lookup("MCP_ENDPOINT_TIMEOUT_SECS") {
            config.endpoint_timeout = parse_timeout(&secs)
                .with_context(|| format!("Invalid MCP_ENDPOINT_TIMEOUT_SECS value: {}", secs))?;
        }

        Ok(config)
    }

    /// Add a header sent with the stream request and every POST.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach `Authorization: Bearer <token>`.
    pub fn with_bearer_token(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.with_header("Authorization", value)
    }

    pub fn with_client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_info = ClientInfo {
            name: name.into(),
            version: version.into(),
        };
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Bound how long `send` waits for the server's `endpoint` event.
    pub fn with_endpoint_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.endpoint_timeout = timeout;
        self
    }

    pub fn with_max_event_size(mut self, max_event_size: usize) -> Self {
        self.max_event_size = max_event_size;
        self
    }
}

/// Parse whole seconds; `0` means no timeout.
fn parse_timeout(value: &str) -> Result<Option<Duration>> {
    let secs: u64 = value.trim().parse()?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}
