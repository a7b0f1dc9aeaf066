//! Bookkeeping for requests that are waiting for a reply.
//!
//! The table has one owner (the client actor), so it needs no locking.  Every
//! callback stored here is invoked at most once: completing, expiring, or
//! failing an entry takes the callback out of it first.
//!
//! # FIFO tombstones
//!
//! In [`CorrelationMode::Fifo`] a reply is matched purely by position.  When a
//! request times out its slot must therefore stay in the queue: the server
//! will still send the late reply, and that reply has to be consumed by the
//! dead slot instead of being handed to the next caller.  An expired slot keeps
//! its place with the callback removed (a tombstone); the late reply is
//! discarded when it reaches the front.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use qalink_core::{probe_request_id, CorrelationMode, RequestId};

use crate::domain::error::ClientError;

/// Receives the outcome of one request: the raw reply bytes or an error.
pub type ResponseCallback = Box<dyn FnOnce(Result<Vec<u8>, ClientError>) + Send + 'static>;

struct PendingRequest {
    id: RequestId,
    callback: Option<ResponseCallback>,
    sent_at: Instant,
}

impl PendingRequest {
    /// Invokes the callback if it is still present.  Returns `true` if it was.
    fn complete(&mut self, result: Result<Vec<u8>, ClientError>) -> bool {
        match self.callback.take() {
            Some(callback) => {
                callback(result);
                true
            }
            None => false,
        }
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The message completed the request with this id.
    Completed { id: RequestId, elapsed: Duration },
    /// The message consumed the slot of a request that had already timed out.
    Discarded(RequestId),
    /// FIFO mode: nothing was pending.
    Unsolicited,
    /// Tagged mode: the message had no usable `request_id`.
    MissingId,
    /// Tagged mode: no pending request carries the echoed id.
    UnknownId(RequestId),
}

/// Pending requests, organised by correlation mode.
pub struct PendingTable {
    entries: Entries,
}

enum Entries {
    Fifo(VecDeque<PendingRequest>),
    Tagged(HashMap<RequestId, PendingRequest>),
}

impl PendingTable {
    pub fn new(mode: CorrelationMode) -> Self {
        let entries = match mode {
            CorrelationMode::Fifo => Entries::Fifo(VecDeque::new()),
            CorrelationMode::Tagged => Entries::Tagged(HashMap::new()),
        };
        Self { entries }
    }

    pub fn mode(&self) -> CorrelationMode {
        match &self.entries {
            Entries::Fifo(_) => CorrelationMode::Fifo,
            Entries::Tagged(_) => CorrelationMode::Tagged,
        }
    }

    /// Records a request that has just been written.
    pub fn insert(&mut self, id: RequestId, callback: ResponseCallback) {
        let entry = PendingRequest {
            id,
            callback: Some(callback),
            sent_at: Instant::now(),
        };
        match &mut self.entries {
            Entries::Fifo(queue) => queue.push_back(entry),
            Entries::Tagged(map) => {
                map.insert(id, entry);
            }
        }
    }

    /// Number of callers still waiting for a reply.  FIFO tombstones are not
    /// counted.
    pub fn waiting(&self) -> usize {
        match &self.entries {
            Entries::Fifo(queue) => queue.iter().filter(|e| e.callback.is_some()).count(),
            Entries::Tagged(map) => map.len(),
        }
    }

    /// Number of replies the table still expects, tombstones included.
    pub fn slots(&self) -> usize {
        match &self.entries {
            Entries::Fifo(queue) => queue.len(),
            Entries::Tagged(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots() == 0
    }

    /// Hands one complete inbound message to the request it answers.
    pub fn deliver(&mut self, message: Vec<u8>) -> Delivery {
        match &mut self.entries {
            Entries::Fifo(queue) => match queue.pop_front() {
                None => Delivery::Unsolicited,
                Some(mut entry) => {
                    let elapsed = entry.sent_at.elapsed();
                    if entry.complete(Ok(message)) {
                        Delivery::Completed {
                            id: entry.id,
                            elapsed,
                        }
                    } else {
                        Delivery::Discarded(entry.id)
                    }
                }
            },
            Entries::Tagged(map) => {
                let Some(id) = probe_request_id(&message) else {
                    return Delivery::MissingId;
                };
                match map.remove(&id) {
                    None => Delivery::UnknownId(id),
                    Some(mut entry) => {
                        let elapsed = entry.sent_at.elapsed();
                        entry.complete(Ok(message));
                        Delivery::Completed { id, elapsed }
                    }
                }
            }
        }
    }

    /// Fails request `id` with [`ClientError::Timeout`] if it is still waiting.
    ///
    /// Returns `true` if a callback was invoked.
    pub fn expire(&mut self, id: RequestId, after: Duration) -> bool {
        match &mut self.entries {
            Entries::Fifo(queue) => queue
                .iter_mut()
                .find(|e| e.id == id)
                .map(|e| e.complete(Err(ClientError::Timeout(after))))
                .unwrap_or(false),
            Entries::Tagged(map) => match map.remove(&id) {
                Some(mut entry) => entry.complete(Err(ClientError::Timeout(after))),
                None => false,
            },
        }
    }

    /// Empties the table, failing every waiting request with `error()`.
    ///
    /// Returns the number of callbacks invoked.
    pub fn fail_all(&mut self, error: impl Fn() -> ClientError) -> usize {
        let entries: Vec<PendingRequest> = match &mut self.entries {
            Entries::Fifo(queue) => queue.drain(..).collect(),
            Entries::Tagged(map) => map.drain().map(|(_, e)| e).collect(),
        };
        let mut failed = 0;
        for mut entry in entries {
            if entry.complete(Err(error())) {
                failed += 1;
            }
        }
        failed
    }
}
