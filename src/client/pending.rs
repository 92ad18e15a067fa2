//! Correlation table matching responses to waiting callers.
//!
//! Every in-flight id maps to exactly one [`Slot`]:
//!
//! - `Waiting` - a caller registered first and is parked on a oneshot
//! - `Buffered` - the response arrived before anyone asked for it
//! - `Abandoned` - the caller gave up (timeout, cancellation, dropped future)
//!
//! A single lock guards the map, so dispatch and registration can never
//! observe each other half-done. Entries are removed as soon as they are
//! matched, which makes delivery exactly-once.
//!
//! `Abandoned` entries only exist to drop a late reply. A server that never
//! answers would leave them behind forever, so at most `MAX_ABANDONED` are
//! remembered and the oldest is forgotten first.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::messages::Response;

/// Upper bound on responses nobody has asked for yet.
pub const MAX_BUFFERED: usize = 1024;

/// Upper bound on remembered abandoned ids.
pub const MAX_ABANDONED: usize = 1024;

enum Slot {
    Waiting(oneshot::Sender<ClientResult<Response>>),
    Buffered(Response),
    Abandoned,
}

#[derive(Default)]
struct State {
    slots: HashMap<u64, Slot>,
    /// Abandoned ids, oldest first. May hold ids already cleared by dispatch.
    abandoned: VecDeque<u64>,
    /// Set once the connection is gone; new waits fail with this reason.
    closed: Option<String>,
}

enum Claim {
    Ready(Response),
    Waiting(oneshot::Receiver<ClientResult<Response>>),
}

/// Map from request id to the caller waiting on it.
pub struct PendingTable {
    state: Mutex<State>,
    max_buffered: usize,
    max_abandoned: usize,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    /// Create a table with the default limits.
    pub fn new() -> Self {
        Self::with_limits(MAX_BUFFERED, MAX_ABANDONED)
    }

    /// Create a table holding at most `max_buffered` unclaimed responses.
    pub fn with_max_buffered(max_buffered: usize) -> Self {
        Self::with_limits(max_buffered, MAX_ABANDONED)
    }

    pub fn with_limits(max_buffered: usize, max_abandoned: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_buffered,
            max_abandoned,
        }
    }

    /// Route a response to its waiter, or buffer it until one arrives.
    pub fn dispatch(&self, response: Response) {
        let id = response.id;
        let mut state = self.state.lock();

        match state.slots.remove(&id) {
            Some(Slot::Waiting(tx)) => {
                if tx.send(Ok(response)).is_err() {
                    debug!(id, "waiter dropped before delivery");
                }
            }
            Some(Slot::Abandoned) => {
                debug!(id, "dropping response for abandoned request");
            }
            Some(Slot::Buffered(first)) => {
                warn!(id, "duplicate response; keeping the first");
                state.slots.insert(id, Slot::Buffered(first));
            }
            None => {
                let buffered = state
                    .slots
                    .values()
                    .filter(|slot| matches!(slot, Slot::Buffered(_)))
                    .count();
                if buffered >= self.max_buffered {
                    warn!(id, buffered, "too many unclaimed responses; dropping");
                    return;
                }
                debug!(id, "buffering response with no waiter");
                state.slots.insert(id, Slot::Buffered(response));
            }
        }
    }

    /// Wait for the response to `id`.
    ///
    /// A buffered response is returned immediately. Otherwise a waiter is
    /// registered; dropping the returned future before it completes marks the
    /// id abandoned so a late response is discarded.
    pub async fn wait_for(&self, id: u64) -> ClientResult<Response> {
        let rx = match self.claim(id)? {
            Claim::Ready(response) => return Ok(response),
            Claim::Waiting(rx) => rx,
        };

        let mut waiter = Waiter { table: self, id, rx };
        match (&mut waiter.rx).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::ConnectionLost("correlation table dropped".to_string())),
        }
    }

    fn claim(&self, id: u64) -> ClientResult<Claim> {
        let mut state = self.state.lock();

        match state.slots.remove(&id) {
            Some(Slot::Buffered(response)) => return Ok(Claim::Ready(response)),
            Some(Slot::Waiting(tx)) => {
                state.slots.insert(id, Slot::Waiting(tx));
                return Err(ClientError::AlreadyWaiting(id));
            }
            Some(Slot::Abandoned) | None => {}
        }

        if let Some(reason) = &state.closed {
            return Err(ClientError::ConnectionLost(reason.clone()));
        }

        let (tx, rx) = oneshot::channel();
        state.slots.insert(id, Slot::Waiting(tx));
        Ok(Claim::Waiting(rx))
    }

    /// Give up on `id`. A response that is already buffered is discarded and
    /// one that arrives later is dropped on arrival.
    pub fn abandon(&self, id: u64) {
        let mut state = self.state.lock();

        match state.slots.remove(&id) {
            Some(Slot::Buffered(_)) => debug!(id, "discarding buffered response for abandoned request"),
            Some(_) | None if state.closed.is_none() => {
                state.slots.insert(id, Slot::Abandoned);
                state.abandoned.push_back(id);
                while state.abandoned.len() > self.max_abandoned {
                    let Some(oldest) = state.abandoned.pop_front() else {
                        break;
                    };
                    if matches!(state.slots.get(&oldest), Some(Slot::Abandoned)) {
                        state.slots.remove(&oldest);
                        debug!(id = oldest, "forgetting abandoned request");
                    }
                }
            }
            _ => {}
        }
    }

    /// Fail every waiter with `ConnectionLost` and refuse new registrations.
    ///
    /// Buffered responses stay claimable.
    pub fn fail_all(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut state = self.state.lock();

        if state.closed.is_none() {
            state.closed = Some(reason.clone());
        }

        state.abandoned.clear();
        let mut failed = 0;
        for (id, slot) in std::mem::take(&mut state.slots) {
            match slot {
                Slot::Waiting(tx) => {
                    failed += 1;
                    let _ = tx.send(Err(ClientError::ConnectionLost(reason.clone())));
                }
                Slot::Buffered(response) => {
                    state.slots.insert(id, Slot::Buffered(response));
                }
                Slot::Abandoned => {}
            }
        }

        if failed > 0 {
            warn!(failed, %reason, "failed outstanding requests");
        }
    }

    /// Number of callers currently parked on a response.
    pub fn in_flight(&self) -> usize {
        self.state
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Waiting(_)))
            .count()
    }

    /// Number of responses waiting to be claimed.
    pub fn buffered(&self) -> usize {
        self.state
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Buffered(_)))
            .count()
    }

    /// Whether `fail_all` has run.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }

    #[cfg(test)]
    fn is_abandoned(&self, id: u64) -> bool {
        matches!(self.state.lock().slots.get(&id), Some(Slot::Abandoned))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().slots.len()
    }
}

/// Registration guard held while a caller is parked.
struct Waiter<'a> {
    table: &'a PendingTable,
    id: u64,
    rx: oneshot::Receiver<ClientResult<Response>>,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        // Empty: still registered and nobody will read the response now.
        // A delivered or closed channel needs no cleanup.
        if let Err(oneshot::error::TryRecvError::Empty) = self.rx.try_recv() {
            self.table.abandon(self.id);
        }
    }
}
