//! Tool client: request ids, correlation and the public operations.
//!
//! `Client` sends JSON-RPC requests through a [`Transport`] and parks each
//! caller until the response carrying its id comes back on the event
//! stream. Responses may arrive in any order and may even arrive before the
//! caller starts waiting; both cases are handled by the correlation table in
//! the `pending` module.

mod pending;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ClientConfig, DEFAULT_PROTOCOL_VERSION, DEFAULT_TIMEOUT_SECS};
use crate::error::{ClientError, ClientResult, TransportError};
use crate::messages::{method, Request, Response};
use crate::models::{decode_content, decode_tools, ClientInfo, InitializeParams, Tool, ToolContent};
use crate::transport::{Inbound, InboundReceiver, SseTransport, Transport};

pub use pending::{PendingTable, MAX_ABANDONED, MAX_BUFFERED};

/// Per-call overrides for deadline and cancellation.
///
/// # Example
///
/// ```ignore
/// let cancel = CancellationToken::new();
/// let options = CallOptions::with_timeout(Duration::from_secs(5)).cancel_on(cancel.clone());
/// let content = client.call_tool_with("query", args, options).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides the client's default request timeout.
    pub timeout: Option<Duration>,
    /// Aborts the wait with `ClientError::Cancelled` when fired.
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    /// Options that bound the call by `timeout` instead of the client default.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    /// Abort the call when `token` is cancelled.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Client for a tool server.
///
/// One client owns one connection. All operations take `&self`, so a client
/// behind an `Arc` can serve any number of concurrent callers.
///
/// # Connection Lifecycle
///
/// - `connect()` - start the transport and perform the `initialize` handshake
/// - `list_tools()` / `call_tool()` - issue requests and wait for the replies
/// - `close()` - stop the transport and fail whatever is still outstanding
///
/// # Example
///
/// ```ignore
/// use mcp_sse_client::{Client, ClientConfig};
/// use serde_json::json;
///
/// let config = ClientConfig::new("http://localhost:8777").with_bearer_token("abcd");
/// let client = Client::connect_sse(&config).await?;
///
/// let tools = client.list_tools().await?;
/// let content = client.call_tool("query", json!({"query": "SELECT 1"})).await?;
/// ```
pub struct Client<T: Transport> {
    info: ClientInfo,
    protocol_version: String,
    /// Default request timeout, `None` waits indefinitely.
    timeout: Option<Duration>,
    /// Monotonically increasing request ID counter.
    request_id: AtomicU64,
    pending: Arc<PendingTable>,
    transport: OnceLock<T>,
    router: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<T: Transport> Client<T> {
    /// Create an unconnected client announcing itself as `name`/`version`.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_info(
            ClientInfo {
                name: name.into(),
                version: version.into(),
            },
            DEFAULT_PROTOCOL_VERSION.to_string(),
            Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        )
    }

    /// Create an unconnected client from configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::with_info(
            config.client_info.clone(),
            config.protocol_version.clone(),
            config.request_timeout,
        )
    }

    fn with_info(info: ClientInfo, protocol_version: String, timeout: Option<Duration>) -> Self {
        Self {
            info,
            protocol_version,
            timeout,
            request_id: AtomicU64::new(1),
            pending: Arc::new(PendingTable::new()),
            transport: OnceLock::new(),
            router: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Set the default request timeout. `None` waits indefinitely.
    ///
    /// Default is 30 seconds.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Start `transport` and perform the `initialize` handshake.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::AlreadyConnected` on a second call,
    /// `ClientError::Transport` if the transport cannot start or send, and
    /// any error the server returns for `initialize`.
    pub async fn connect(&self, transport: T) -> ClientResult<()> {
        self.connect_with(transport, CallOptions::default()).await
    }

    /// [`connect`](Self::connect) with a per-call deadline or cancellation.
    ///
    /// The transport is kept only once it has started, so a failed start
    /// leaves the client free to connect again with a new transport.
    pub async fn connect_with(&self, transport: T, options: CallOptions) -> ClientResult<()> {
        if self.transport.get().is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        let inbound = transport.start().await?;
        if self.transport.set(transport).is_err() {
            return Err(ClientError::AlreadyConnected);
        }
        self.spawn_router(inbound);

        let params = InitializeParams {
            protocol_version: self.protocol_version.clone(),
            capabilities: Map::new(),
            client_info: self.info.clone(),
        };
        let params = serde_json::to_value(params).map_err(TransportError::Serialize)?;

        self.request(method::INITIALIZE, params, options).await?;
        info!(name = %self.info.name, version = %self.info.version, "connected");
        Ok(())
    }

    /// List the tools the server exposes.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Server` if the server answers with an error and
    /// `ClientError::Decode` if `result.tools` is missing or malformed.
    pub async fn list_tools(&self) -> ClientResult<Vec<Tool>> {
        self.list_tools_with(CallOptions::default()).await
    }

    /// [`list_tools`](Self::list_tools) with a per-call deadline or cancellation.
    pub async fn list_tools_with(&self, options: CallOptions) -> ClientResult<Vec<Tool>> {
        let result = self.request(method::TOOLS_LIST, json!({}), options).await?;
        decode_tools(result)
    }

    /// Invoke `name` with `arguments` and return the content it produced.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Server` if the server answers with an error and
    /// `ClientError::Decode` if `result.content` is missing or malformed.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ClientResult<Vec<ToolContent>> {
        self.call_tool_with(name, arguments, CallOptions::default()).await
    }

    /// [`call_tool`](Self::call_tool) with a per-call deadline or cancellation.
    ///
    /// On timeout or cancellation the id is abandoned, so a reply that
    /// arrives afterwards is dropped.
    pub async fn call_tool_with(
        &self,
        name: &str,
        arguments: Value,
        options: CallOptions,
    ) -> ClientResult<Vec<ToolContent>> {
        let params = json!({
            "name": name,
            "arguments": arguments,
        });
        let result = self.request(method::TOOLS_CALL, params, options).await?;
        decode_content(result)
    }

    /// Route a response to the caller waiting on its id.
    ///
    /// Responses nobody is waiting for yet are buffered until a caller asks.
    pub fn dispatch(&self, response: Response) {
        self.pending.dispatch(response);
    }

    /// Stop the transport and fail every outstanding request.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(transport) = self.transport.get() {
            transport.close();
        }
        if let Some(router) = self.router.lock().take() {
            router.abort();
        }
        self.pending.fail_all("client closed");
    }

    /// Number of requests currently waiting for a response.
    pub fn in_flight(&self) -> usize {
        self.pending.in_flight()
    }

    /// Whether the connection has ended, by EOF, error or `close()`.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.pending.is_closed()
    }

    /// Generate the next request ID.
    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    fn transport(&self) -> ClientResult<&T> {
        self.transport.get().ok_or(ClientError::NotConnected)
    }

    fn spawn_router(&self, inbound: InboundReceiver) {
        let handle = tokio::spawn(route_inbound(inbound, Arc::clone(&self.pending)));
        *self.router.lock() = Some(handle);
    }

    /// Send a request and wait for its result (or its error).
    async fn request(&self, method: &str, params: Value, options: CallOptions) -> ClientResult<Value> {
        let transport = self.transport()?;
        if self.is_closed() {
            return Err(ClientError::ConnectionLost("client closed".to_string()));
        }

        let id = self.next_id();
        let request = Request::new(id, method, params);
        debug!(id, method, "sending request");

        let registered = AtomicBool::new(false);
        let exchange = async {
            transport.send(&request).await?;
            registered.store(true, Ordering::SeqCst);
            self.pending.wait_for(id).await
        };

        let response = match self.with_deadline(exchange, options).await {
            Err(e @ (ClientError::Timeout(_) | ClientError::Cancelled)) => {
                // The waiter guard already handled an id that was registered.
                if !registered.load(Ordering::SeqCst) {
                    self.pending.abandon(id);
                }
                debug!(id, method, error = %e, "request abandoned");
                return Err(e);
            }
            other => other?,
        };

        debug!(id, method, "response matched");
        response.into_result().map_err(ClientError::from)
    }

    async fn with_deadline<F>(&self, exchange: F, options: CallOptions) -> ClientResult<Response>
    where
        F: Future<Output = ClientResult<Response>>,
    {
        let limit = options.timeout.or(self.timeout);
        let cancel = options.cancel.unwrap_or_default();

        let bounded = async {
            match limit {
                Some(limit) => timeout(limit, exchange)
                    .await
                    .unwrap_or(Err(ClientError::Timeout(limit))),
                None => exchange.await,
            }
        };

        tokio::select! {
            result = bounded => result,
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
        }
    }
}

impl Client<SseTransport> {
    /// Build an SSE transport from `config`, connect, and return the client.
    pub async fn connect_sse(config: &ClientConfig) -> ClientResult<Self> {
        let transport = SseTransport::new(config)?;
        let client = Self::from_config(config);
        client.connect(transport).await?;
        Ok(client)
    }
}

impl<T: Transport> Drop for Client<T> {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.get() {
            transport.close();
        }
        if let Some(router) = self.router.get_mut().take() {
            router.abort();
        }
    }
}

/// Feed inbound events to the correlation table until the stream ends.
async fn route_inbound(mut inbound: InboundReceiver, pending: Arc<PendingTable>) {
    while let Some(event) = inbound.recv().await {
        match event {
            Inbound::Message(response) => pending.dispatch(response),
            Inbound::Ended(end) => {
                pending.fail_all(end.to_string());
                return;
            }
        }
    }
    pending.fail_all("event stream dropped");
}
