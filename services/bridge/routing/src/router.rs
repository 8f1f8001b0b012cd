//! Push listener registry.
//!
//! Every unsolicited radio message is matched against all registrations and
//! handed to each matching delivery channel with a non-blocking send. A full
//! channel loses that one message; a closed channel loses its registrations.

use crate::RouterError;
use dashmap::DashMap;
use esb_wire::{ListenFilter, RadioMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Identifier of a single listener registration
pub type SubscriptionId = u64;

#[derive(Debug)]
struct Registration {
    filter: ListenFilter,
    sender: mpsc::Sender<RadioMessage>,
}

/// Registry of {address filter, command filter} -> delivery channel entries
#[derive(Debug)]
pub struct PushRouter {
    registrations: DashMap<SubscriptionId, Registration>,
    next_id: AtomicU64,
}

impl PushRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self {
            registrations: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `sender` for messages passing `filter`.
    ///
    /// Registrations are not de-duplicated: registering the same filter
    /// twice yields two deliveries per matching message.
    pub fn subscribe(
        &self,
        filter: ListenFilter,
        sender: mpsc::Sender<RadioMessage>,
    ) -> Result<SubscriptionId, RouterError> {
        if sender.is_closed() {
            return Err(RouterError::InvalidChannel);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.registrations.insert(id, Registration { filter, sender });
        debug!("Listener {} registered for {}", id, filter);
        Ok(id)
    }

    /// Remove every registration bound to `sender`, returning how many were removed
    pub fn unsubscribe(&self, sender: &mpsc::Sender<RadioMessage>) -> usize {
        let mut removed = 0;
        self.registrations.retain(|_, reg| {
            if reg.sender.same_channel(sender) {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            debug!("Removed {} listener registrations", removed);
        }
        removed
    }

    /// Remove a single registration
    pub fn remove(&self, id: SubscriptionId) -> bool {
        self.registrations.remove(&id).is_some()
    }

    /// Deliver a message to every matching registration.
    ///
    /// Returns the number of registrations the message was handed to.
    pub fn dispatch(&self, msg: &RadioMessage) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.registrations.iter() {
            let reg = entry.value();
            if !reg.filter.matches(msg) {
                continue;
            }

            match reg.sender.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Listener {} is full, dropping message from {}",
                        entry.key(),
                        msg.address
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("Listener {} channel closed, marking for removal", entry.key());
                    closed.push(*entry.key());
                }
            }
        }

        for id in closed {
            self.registrations.remove(&id);
        }

        debug!(
            "Push 0x{:02x} from {} delivered to {} listeners",
            msg.command, msg.address, delivered
        );
        delivered
    }

    /// Current registrations and their filters
    pub fn subscriptions(&self) -> Vec<(SubscriptionId, ListenFilter)> {
        let mut subs: Vec<_> = self
            .registrations
            .iter()
            .map(|entry| (*entry.key(), entry.value().filter))
            .collect();
        subs.sort_by_key(|(id, _)| *id);
        subs
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Whether there are no registrations
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Drop all registrations
    pub fn clear(&self) {
        self.registrations.clear();
    }
}

impl Default for PushRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use esb_wire::{Address, WILDCARD_COMMAND};

    const A: Address = Address::new([1, 2, 3, 4, 5]);
    const B: Address = Address::new([9, 9, 9, 9, 9]);

    fn msg(address: Address, command: u8, payload: &'static [u8]) -> RadioMessage {
        RadioMessage::new(address, command, Bytes::from_static(payload)).unwrap()
    }

    #[tokio::test]
    async fn test_filter_fan_out() {
        let router = PushRouter::new();
        let (exact_tx, mut exact_rx) = mpsc::channel(8);
        let (any_src_tx, mut any_src_rx) = mpsc::channel(8);
        let (any_cmd_tx, mut any_cmd_rx) = mpsc::channel(8);
        let (other_tx, mut other_rx) = mpsc::channel(8);

        router.subscribe(ListenFilter::new(A, 1), exact_tx).unwrap();
        router
            .subscribe(ListenFilter::new(Address::ZERO, 1), any_src_tx)
            .unwrap();
        router
            .subscribe(ListenFilter::new(A, WILDCARD_COMMAND), any_cmd_tx)
            .unwrap();
        router.subscribe(ListenFilter::new(B, 1), other_tx).unwrap();

        assert_eq!(router.dispatch(&msg(A, 1, b"x")), 3);

        assert_eq!(exact_rx.recv().await.unwrap().payload.as_ref(), b"x");
        assert!(any_src_rx.recv().await.is_some());
        assert!(any_cmd_rx.recv().await.is_some());
        assert!(other_rx.try_recv().is_err());

        // Concrete command filter does not match another command
        assert_eq!(router.dispatch(&msg(A, 2, b"y")), 1);
        assert!(exact_rx.try_recv().is_err());
        assert_eq!(any_cmd_rx.recv().await.unwrap().command, 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_by_channel() {
        let router = PushRouter::new();
        let (ch1, _rx1) = mpsc::channel(8);
        let (ch2, _rx2) = mpsc::channel(8);

        router.subscribe(ListenFilter::new(A, 1), ch1.clone()).unwrap();
        router.subscribe(ListenFilter::new(A, 2), ch2.clone()).unwrap();
        router.subscribe(ListenFilter::new(A, 2), ch1.clone()).unwrap();
        router
            .subscribe(ListenFilter::new(A, WILDCARD_COMMAND), ch2.clone())
            .unwrap();

        assert_eq!(router.unsubscribe(&ch2), 2);
        assert_eq!(router.len(), 2);
        assert_eq!(router.unsubscribe(&ch2), 0);
        assert_eq!(router.unsubscribe(&ch1), 2);
        assert!(router.is_empty());
    }

    #[tokio::test]
    async fn test_match_all_preserves_order() {
        let router = PushRouter::new();
        let (tx, mut rx) = mpsc::channel(8);
        router.subscribe(ListenFilter::any(), tx).unwrap();

        router.dispatch(&msg(A, 1, b"first"));
        router.dispatch(&msg(B, 2, b"second"));
        router.dispatch(&msg(A, 3, b"third"));

        assert_eq!(rx.recv().await.unwrap().payload.as_ref(), b"first");
        assert_eq!(rx.recv().await.unwrap().payload.as_ref(), b"second");
        assert_eq!(rx.recv().await.unwrap().payload.as_ref(), b"third");
    }

    #[tokio::test]
    async fn test_duplicate_registrations_deliver_twice() {
        let router = PushRouter::new();
        let (tx, mut rx) = mpsc::channel(8);
        router.subscribe(ListenFilter::new(A, 1), tx.clone()).unwrap();
        router.subscribe(ListenFilter::new(A, 1), tx).unwrap();

        assert_eq!(router.dispatch(&msg(A, 1, b"x")), 2);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_full_listener_does_not_block_others() {
        let router = PushRouter::new();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        router.subscribe(ListenFilter::any(), slow_tx).unwrap();
        router.subscribe(ListenFilter::any(), fast_tx).unwrap();

        assert_eq!(router.dispatch(&msg(A, 1, b"1")), 2);
        assert_eq!(router.dispatch(&msg(A, 1, b"2")), 1);

        assert_eq!(slow_rx.recv().await.unwrap().payload.as_ref(), b"1");
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(fast_rx.recv().await.unwrap().payload.as_ref(), b"1");
        assert_eq!(fast_rx.recv().await.unwrap().payload.as_ref(), b"2");
        // Full is not closed, the registration stays
        assert_eq!(router.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_channel_pruned() {
        let router = PushRouter::new();
        let (tx, rx) = mpsc::channel(8);
        router.subscribe(ListenFilter::any(), tx).unwrap();
        drop(rx);

        assert_eq!(router.dispatch(&msg(A, 1, b"x")), 0);
        assert!(router.is_empty());
    }

    #[tokio::test]
    async fn test_closed_channel_rejected() {
        let router = PushRouter::new();
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        assert_eq!(
            router.subscribe(ListenFilter::any(), tx),
            Err(RouterError::InvalidChannel)
        );
    }

    #[tokio::test]
    async fn test_subscriptions_listing() {
        let router = PushRouter::new();
        let (tx, _rx) = mpsc::channel(8);
        let first = router.subscribe(ListenFilter::new(A, 1), tx.clone()).unwrap();
        let second = router.subscribe(ListenFilter::any(), tx).unwrap();

        let subs = router.subscriptions();
        assert_eq!(subs, vec![(first, ListenFilter::new(A, 1)), (second, ListenFilter::any())]);

        assert!(router.remove(first));
        assert!(!router.remove(first));
        router.clear();
        assert!(router.is_empty());
    }
}
