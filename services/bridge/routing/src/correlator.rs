//! Single-slot request/reply correlation.
//!
//! Neither wire format carries a request identifier, so only one request can
//! be outstanding at a time. Callers serialize at the transport boundary; the
//! correlator keeps a local token per request so that a late reply for a
//! timed out request can never complete a newer one.

use crate::CorrelationError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// A reply that can be matched against the command of its request
pub trait Correlated {
    /// Command byte of the reply
    fn command(&self) -> u8;
}

impl Correlated for esb_wire::Frame {
    fn command(&self) -> u8 {
        self.command
    }
}

impl Correlated for esb_wire::BridgeAnswer {
    fn command(&self) -> u8 {
        self.command
    }
}

#[derive(Debug)]
struct Pending<T> {
    token: u64,
    expected: u8,
    reply_tx: oneshot::Sender<T>,
}

/// Handle held by the caller while its request is outstanding
#[derive(Debug)]
pub struct PendingReply<T> {
    token: u64,
    expected: u8,
    reply_rx: oneshot::Receiver<T>,
}

impl<T> PendingReply<T> {
    /// Command the reply must carry
    pub fn expected(&self) -> u8 {
        self.expected
    }
}

/// Single-slot mailbox matching replies to the outstanding request
#[derive(Debug)]
pub struct RequestCorrelator<T> {
    slot: Mutex<Option<Pending<T>>>,
    next_token: AtomicU64,
}

impl<T: Correlated> RequestCorrelator<T> {
    /// Create an empty correlator
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            next_token: AtomicU64::new(1),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Pending<T>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a request for `expected`. Must be called before the request
    /// is written so a fast reply cannot slip past.
    pub fn begin(&self, expected: u8) -> PendingReply<T> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();

        let previous = self.slot().replace(Pending {
            token,
            expected,
            reply_tx,
        });
        if let Some(previous) = previous {
            warn!(
                "Replacing outstanding request for command 0x{:02x}",
                previous.expected
            );
        }

        PendingReply {
            token,
            expected,
            reply_rx,
        }
    }

    /// Hand a reply to the waiting caller.
    ///
    /// Returns the reply back if nobody is waiting for it.
    pub fn resolve(&self, reply: T) -> Option<T> {
        let pending = self.slot().take();
        match pending {
            Some(pending) => match pending.reply_tx.send(reply) {
                Ok(()) => None,
                Err(reply) => {
                    debug!("Waiter for command 0x{:02x} already gone", pending.expected);
                    Some(reply)
                }
            },
            None => Some(reply),
        }
    }

    /// Wait for the reply of a pending request.
    ///
    /// The first reply delivered decides the outcome: a reply with another
    /// command yields [`CorrelationError::CommandMismatch`].
    pub async fn await_reply(
        &self,
        pending: PendingReply<T>,
        timeout: Duration,
    ) -> Result<T, CorrelationError> {
        let PendingReply {
            token,
            expected,
            reply_rx,
        } = pending;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) if reply.command() == expected => Ok(reply),
            Ok(Ok(reply)) => Err(CorrelationError::CommandMismatch {
                expected,
                actual: reply.command(),
            }),
            Ok(Err(_)) => Err(CorrelationError::Closed),
            Err(_) => {
                self.clear(token);
                Err(CorrelationError::Timeout(expected))
            }
        }
    }

    /// Drop a pending request that will never be awaited (e.g. the write failed)
    pub fn abandon(&self, pending: PendingReply<T>) {
        self.clear(pending.token);
    }

    /// Fail the outstanding request, if any, with [`CorrelationError::Closed`]
    pub fn cancel(&self) -> bool {
        self.slot().take().is_some()
    }

    /// Whether a request is outstanding
    pub fn is_pending(&self) -> bool {
        self.slot().is_some()
    }

    fn clear(&self, token: u64) {
        let mut slot = self.slot();
        if slot.as_ref().map(|p| p.token) == Some(token) {
            *slot = None;
        }
    }
}

impl<T: Correlated> Default for RequestCorrelator<T> {
    fn default() -> Self {
        Self::new()
    }
}
