//! Fan-out registry with bounded per-subscriber mailboxes.
//!
//! [`EventHub`] maintains the set of live subscribers (WebSocket and SSE
//! connections alike) and pushes [`WatcherEvent`]s to each through a bounded
//! `mpsc` mailbox. Publishing never blocks: a full mailbox drops that
//! message for that subscriber only, and a closed mailbox is pruned. The
//! durable stores remain the source of truth; delivery is best-effort,
//! at-most-once, with no replay.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

use super::WatcherEvent;

/// Handle identifying one subscriber in the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared fan-out hub; cheap to clone.
///
/// The registry lock guards only the subscriber map; publication takes a
/// snapshot of the senders and delivers outside the lock, so slow
/// enumeration never blocks new connects or disconnects.
#[derive(Debug, Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

#[derive(Debug)]
struct HubInner {
    mailbox_capacity: usize,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<WatcherEvent>>>,
}

impl EventHub {
    /// Creates a hub whose subscribers get mailboxes of the given capacity.
    #[must_use]
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                mailbox_capacity: mailbox_capacity.max(1),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers a new subscriber, returning its id and mailbox receiver.
    #[must_use]
    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<WatcherEvent>) {
        let (tx, rx) = mpsc::channel(self.inner.mailbox_capacity);
        let id = SubscriberId(Uuid::new_v4());
        self.lock_subscribers().insert(id, tx);
        (id, rx)
    }

    /// Removes a subscriber; safe to call after the receiver is gone.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.lock_subscribers().remove(&id);
    }

    /// Pushes an event to every live subscriber, returning how many
    /// mailboxes accepted it.
    ///
    /// Full mailboxes drop the event for that subscriber only; closed
    /// mailboxes are pruned from the registry.
    pub fn publish(&self, event: &WatcherEvent) -> usize {
        let snapshot: Vec<(SubscriberId, mpsc::Sender<WatcherEvent>)> = self
            .lock_subscribers()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut closed: Vec<SubscriberId> = Vec::new();
        for (id, tx) in snapshot {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        subscriber = %id,
                        event_type = event.event_type_str(),
                        "subscriber mailbox full; event dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.lock_subscribers();
            for id in closed {
                subscribers.remove(&id);
            }
        }

        delivered
    }

    /// Returns the current number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    fn lock_subscribers(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<WatcherEvent>>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_event() -> WatcherEvent {
        WatcherEvent::StudiesRefresh {
            source: "test".to_string(),
            url: String::new(),
            status_code: 200,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn publish_without_subscribers_delivers_zero() {
        let hub = EventHub::new(4);
        assert_eq!(hub.publish(&make_event()), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_event() {
        let hub = EventHub::new(4);
        let (_id, mut rx) = hub.subscribe();

        assert_eq!(hub.publish(&make_event()), 1);

        let event = rx.recv().await;
        let Some(event) = event else {
            panic!("expected event");
        };
        assert_eq!(event.event_type_str(), "studies_refresh");
    }

    #[tokio::test]
    async fn full_mailbox_drops_without_blocking_others() {
        let hub = EventHub::new(1);
        let (_slow_id, mut slow_rx) = hub.subscribe();
        let (_fast_id, mut fast_rx) = hub.subscribe();

        // First publish fills both mailboxes.
        assert_eq!(hub.publish(&make_event()), 2);
        // Slow subscriber never drains; its mailbox is now full.
        assert_eq!(hub.publish(&make_event()), 0);

        // Fast subscriber drains and keeps receiving.
        let Some(_first) = fast_rx.recv().await else {
            panic!("fast subscriber missing first event");
        };
        assert_eq!(hub.publish(&make_event()), 1);
        let Some(_third) = fast_rx.recv().await else {
            panic!("fast subscriber missing third event");
        };

        // Slow subscriber still has exactly the first event.
        let Some(_only) = slow_rx.recv().await else {
            panic!("slow subscriber missing first event");
        };
        assert!(slow_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_mailboxes_are_pruned() {
        let hub = EventHub::new(4);
        let (_id, rx) = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        drop(rx);
        let _ = hub.publish(&make_event());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_removes_entry() {
        let hub = EventHub::new(4);
        let (id, _rx) = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        hub.unsubscribe(id);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
