//! Server-Sent Events transport over HTTP.
//!
//! `start()` issues a GET against the base URL and keeps the response body
//! open as the event stream. The server's first `endpoint` event names the
//! path requests are POSTed to; every `message` event carries a response.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::framing::{EventDecoder, EventKind, StreamEvent};
use super::{Inbound, InboundReceiver, StreamEnd, Transport};
use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::messages::{decode_message, Request};

/// Connection timeout for both the stream GET and request POSTs.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Discovery state of the POST target.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EndpointState {
    Pending,
    Ready(String),
    /// The stream ended before an endpoint was announced.
    Gone,
}

/// HTTP + SSE implementation of [`Transport`].
///
/// # Example
///
/// ```ignore
/// let config = ClientConfig::new("http://localhost:8777").with_bearer_token("abcd");
/// let transport = SseTransport::new(&config)?;
/// let client = Client::from_config(&config);
/// client.connect(transport).await?;
/// ```
pub struct SseTransport {
    http: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
    endpoint: Arc<watch::Sender<EndpointState>>,
    endpoint_timeout: Option<Duration>,
    max_event_size: usize,
    started: AtomicBool,
    shutdown: CancellationToken,
}

impl SseTransport {
    /// Build a transport from configuration. Does not touch the network.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidUrl` if the base URL does not parse and
    /// `TransportError::InvalidHeader` for header names or values that are not
    /// valid HTTP.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        Url::parse(&config.base_url)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| TransportError::InvalidHeader(name.clone()))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| TransportError::InvalidHeader(name.clone()))?;
            headers.append(header_name, header_value);
        }

        // No overall request timeout: the stream GET stays open for the
        // lifetime of the connection.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;

        let (endpoint, _) = watch::channel(EndpointState::Pending);

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            headers,
            endpoint: Arc::new(endpoint),
            endpoint_timeout: config.endpoint_timeout,
            max_event_size: config.max_event_size,
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    /// The announced POST target, if the `endpoint` event has arrived.
    pub fn endpoint(&self) -> Option<String> {
        match &*self.endpoint.borrow() {
            EndpointState::Ready(endpoint) => Some(endpoint.clone()),
            _ => None,
        }
    }

    async fn open_stream(&self) -> Result<reqwest::Response, TransportError> {
        let response = self
            .http
            .get(&self.base_url)
            .headers(self.headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(TransportError::UnexpectedStatus {
                expected: StatusCode::OK.as_u16(),
                actual: response.status().as_u16(),
            });
        }

        Ok(response)
    }

    /// Wait until the server has announced where requests go.
    async fn wait_for_endpoint(&self) -> Result<String, TransportError> {
        let mut rx = self.endpoint.subscribe();
        let settled = |state: &EndpointState| !matches!(state, EndpointState::Pending);

        let state = match self.endpoint_timeout {
            Some(limit) => timeout(limit, rx.wait_for(settled))
                .await
                .map_err(|_| TransportError::EndpointTimeout(limit))?
                .map(|state| (*state).clone()),
            None => rx.wait_for(settled).await.map(|state| (*state).clone()),
        };

        match state {
            Ok(EndpointState::Ready(endpoint)) => Ok(endpoint),
            _ => Err(TransportError::Closed),
        }
    }
}

impl Transport for SseTransport {
    async fn start(&self) -> Result<InboundReceiver, TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }

        let response = match self.open_stream().await {
            Ok(response) => response,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        info!(url = %self.base_url, "event stream opened");

        let (tx, rx) = mpsc::unbounded_channel();
        let router = EventRouter::new(Arc::clone(&self.endpoint), tx);
        let decoder = EventDecoder::with_max_event_size(self.max_event_size);
        tokio::spawn(receive_loop(response, decoder, router, self.shutdown.clone()));

        Ok(rx)
    }

    async fn send(&self, request: &Request) -> Result<(), TransportError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(TransportError::NotStarted);
        }

        let endpoint = self.wait_for_endpoint().await?;
        let url = resolve_endpoint(&self.base_url, &endpoint)?;
        let body = serde_json::to_vec(request)?;

        debug!(id = request.id, method = %request.method, %url, "posting request");

        let response = self
            .http
            .post(url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(TransportError::UnexpectedStatus {
                expected: StatusCode::ACCEPTED.as_u16(),
                actual: response.status().as_u16(),
            });
        }

        Ok(())
    }

    fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Join the base URL and the announced endpoint.
///
/// An endpoint that is itself an absolute URL is used as is; anything else
/// is appended to the base URL verbatim.
fn resolve_endpoint(base_url: &str, endpoint: &str) -> Result<Url, TransportError> {
    if let Ok(absolute) = Url::parse(endpoint) {
        return Ok(absolute);
    }

    let joined = format!("{}{}", base_url, endpoint);
    Url::parse(&joined).map_err(|e| TransportError::InvalidUrl(format!("{}: {}", joined, e)))
}

/// Read the body chunk by chunk until EOF, failure or shutdown.
async fn receive_loop(
    mut response: reqwest::Response,
    mut decoder: EventDecoder,
    router: EventRouter,
    shutdown: CancellationToken,
) {
    let end = loop {
        let chunk = tokio::select! {
            _ = shutdown.cancelled() => break StreamEnd::Closed,
            chunk = response.chunk() => chunk,
        };

        match chunk {
            Ok(Some(bytes)) => {
                decoder.feed(&bytes);
                if let Err(end) = drain_events(&mut decoder, &router) {
                    break end;
                }
            }
            Ok(None) => {
                if decoder.has_partial() {
                    warn!("event stream ended inside an event block; discarding it");
                }
                break StreamEnd::Eof;
            }
            Err(e) => break StreamEnd::Failed(format!("failed to read event stream: {}", e)),
        }
    };

    match &end {
        StreamEnd::Failed(reason) => error!(%reason, "receive loop terminated"),
        other => info!(reason = %other, "receive loop terminated"),
    }
    router.finish(end);
}

fn drain_events(decoder: &mut EventDecoder, router: &EventRouter) -> Result<(), StreamEnd> {
    loop {
        match decoder.next_event() {
            Ok(Some(event)) => router.route(event)?,
            Ok(None) => return Ok(()),
            Err(e) => return Err(StreamEnd::Failed(e.to_string())),
        }
    }
}

/// Applies decoded events: records the endpoint and forwards responses.
struct EventRouter {
    endpoint: Arc<watch::Sender<EndpointState>>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl EventRouter {
    fn new(endpoint: Arc<watch::Sender<EndpointState>>, inbound: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { endpoint, inbound }
    }

    fn route(&self, event: StreamEvent) -> Result<(), StreamEnd> {
        match event.kind {
            EventKind::Endpoint => {
                // First announcement wins for the lifetime of the connection.
                let accepted = self.endpoint.send_if_modified(|state| {
                    if *state == EndpointState::Pending {
                        *state = EndpointState::Ready(event.data.clone());
                        true
                    } else {
                        false
                    }
                });
                if accepted {
                    info!(endpoint = %event.data, "endpoint announced");
                } else {
                    warn!(endpoint = %event.data, "ignoring repeated endpoint event");
                }
            }
            EventKind::Message => match decode_message(&event.data) {
                Ok(Some(response)) => {
                    debug!(id = response.id, "response received");
                    if self.inbound.send(Inbound::Message(response)).is_err() {
                        return Err(StreamEnd::Closed);
                    }
                }
                Ok(None) => debug!(payload = %event.data, "ignoring server notification"),
                Err(e) => return Err(StreamEnd::Failed(format!("malformed message payload: {}", e))),
            },
            EventKind::Other(kind) => debug!(%kind, "ignoring unknown event kind"),
        }
        Ok(())
    }

    fn finish(self, end: StreamEnd) {
        self.endpoint.send_if_modified(|state| {
            if *state == EndpointState::Pending {
                *state = EndpointState::Gone;
                true
            } else {
                false
            }
        });
        let _ = self.inbound.send(Inbound::Ended(end));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Response;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn router() -> (EventRouter, watch::Receiver<EndpointState>, InboundReceiver) {
        let (endpoint, endpoint_rx) = watch::channel(EndpointState::Pending);
        let (tx, rx) = mpsc::unbounded_channel();
        (EventRouter::new(Arc::new(endpoint), tx), endpoint_rx, rx)
    }

    #[test]
    fn test_first_endpoint_wins() {
        let (router, endpoint_rx, _inbound) = router();

        router
            .route(StreamEvent::new(EventKind::Endpoint, "/messages?session=1"))
            .unwrap();
        router
            .route(StreamEvent::new(EventKind::Endpoint, "/messages?session=2"))
            .unwrap();

        assert_eq!(
            *endpoint_rx.borrow(),
            EndpointState::Ready("/messages?session=1".to_string())
        );
    }

    #[test]
    fn test_message_is_forwarded() {
        let (router, _endpoint_rx, mut inbound) = router();

        router
            .route(StreamEvent::new(EventKind::Message, r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#))
            .unwrap();

        assert_eq!(
            inbound.try_recv().unwrap(),
            Inbound::Message(Response::success(3, json!({"ok": true})))
        );
    }

    #[test]
    fn test_notification_and_unknown_kind_are_ignored() {
        let (router, _endpoint_rx, mut inbound) = router();

        router
            .route(StreamEvent::new(EventKind::Message, r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#))
            .unwrap();
        router
            .route(StreamEvent::new(EventKind::Other("ping".to_string()), "1"))
            .unwrap();

        assert!(inbound.try_recv().is_err());
    }

    #[test]
    fn test_malformed_message_fails_the_stream() {
        let (router, _endpoint_rx, _inbound) = router();

        let end = router
            .route(StreamEvent::new(EventKind::Message, "{not json"))
            .unwrap_err();
        assert!(matches!(end, StreamEnd::Failed(reason) if reason.contains("malformed message payload")));
    }

    #[test]
    fn test_finish_releases_endpoint_waiters() {
        let (router, endpoint_rx, mut inbound) = router();

        router.finish(StreamEnd::Eof);

        assert_eq!(*endpoint_rx.borrow(), EndpointState::Gone);
        assert_eq!(inbound.try_recv().unwrap(), Inbound::Ended(StreamEnd::Eof));
    }

    #[test]
    fn test_finish_keeps_known_endpoint() {
        let (router, endpoint_rx, _inbound) = router();

        router.route(StreamEvent::new(EventKind::Endpoint, "/m")).unwrap();
        router.finish(StreamEnd::Closed);

        assert_eq!(*endpoint_rx.borrow(), EndpointState::Ready("/m".to_string()));
    }

    #[test]
    fn test_drain_events_stops_on_framing_error() {
        let (router, _endpoint_rx, mut inbound) = router();
        let mut decoder = EventDecoder::new();

        decoder.feed(b"event: message\ndata: {\"id\":1,\"result\":{}}\n\nbogus\n");
        let end = drain_events(&mut decoder, &router).unwrap_err();

        assert!(matches!(end, StreamEnd::Failed(_)));
        assert!(matches!(inbound.try_recv().unwrap(), Inbound::Message(r) if r.id == 1));
    }

    #[test]
    fn test_resolve_relative_endpoint() {
        let url = resolve_endpoint("http://localhost:8777", "/messages?sessionId=abc").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8777/messages?sessionId=abc");
    }

    #[test]
    fn test_resolve_absolute_endpoint() {
        let url = resolve_endpoint("http://localhost:8777/sse", "http://other:9000/messages").unwrap();
        assert_eq!(url.as_str(), "http://other:9000/messages");
    }

    #[test]
    fn test_new_rejects_bad_configuration() {
        let bad_url = ClientConfig::new("not a url");
        assert!(matches!(SseTransport::new(&bad_url), Err(TransportError::InvalidUrl(_))));

        let bad_header = ClientConfig::new("http://localhost:8777").with_header("Bad Header", "x");
        assert!(matches!(
            SseTransport::new(&bad_header),
            Err(TransportError::InvalidHeader(name)) if name == "Bad Header"
        ));
    }

    #[tokio::test]
    async fn test_send_before_start_fails() {
        let transport = SseTransport::new(&ClientConfig::new("http://localhost:8777")).unwrap();
        let request = Request::new(1, "tools/list", json!({}));
        assert!(matches!(transport.send(&request).await, Err(TransportError::NotStarted)));
        assert_eq!(transport.endpoint(), None);
    }
}
