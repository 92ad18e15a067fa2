//! Transport layer for the tool client.
//!
//! A transport owns the connection to the tool server. It opens the
//! server-push stream, decodes it into events, and forwards every decoded
//! response to the client over a per-connection channel:
//!
//! ```text
//! ┌──────────────┐   POST base+endpoint (202)   ┌──────────────┐
//! │    Client    │ ───────────────────────────► │              │
//! │ (correlates  │                              │ tool server  │
//! │   by id)     │ ◄─────────────────────────── │              │
//! └──────────────┘   Inbound ◄ GET base (SSE)   └──────────────┘
//! ```
//!
//! The receiver handed back by [`Transport::start`] is the single consumer of
//! decoded `message` events; no callback state is shared between the
//! receive loop and callers.

mod framing;
mod sse;

use std::fmt;
use std::future::Future;

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::messages::{Request, Response};

pub use framing::{EventDecoder, EventKind, StreamEvent, DEFAULT_MAX_EVENT_SIZE};
pub use sse::SseTransport;

/// Receiving half of a connection's inbound channel.
pub type InboundReceiver = mpsc::UnboundedReceiver<Inbound>;

/// Item delivered by a running transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A decoded response, to be routed by id.
    Message(Response),
    /// The receive loop has terminated. Always the last item.
    Ended(StreamEnd),
}

/// Why a receive loop terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The server closed the stream.
    Eof,
    /// The transport was closed locally.
    Closed,
    /// Framing, decoding or network failure.
    Failed(String),
}

impl fmt::Display for StreamEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamEnd::Eof => f.write_str("event stream ended"),
            StreamEnd::Closed => f.write_str("transport closed"),
            StreamEnd::Failed(reason) => write!(f, "event stream failed: {}", reason),
        }
    }
}

/// Abstract send/receive capability used by [`crate::Client`].
///
/// Implementations must be usable through a shared reference: `send` is
/// called concurrently by every in-flight request.
pub trait Transport: Send + Sync + 'static {
    /// Open the connection and start the receive loop.
    ///
    /// Fails immediately if the connection cannot be established. On success
    /// the returned receiver yields every decoded response followed by a
    /// final [`Inbound::Ended`].
    fn start(&self) -> impl Future<Output = Result<InboundReceiver, TransportError>> + Send;

    /// Submit a request. Waits until the transport knows where to send it.
    fn send(&self, request: &Request) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Stop the receive loop. The inbound channel ends with [`StreamEnd::Closed`].
    fn close(&self) {}
}
