//! Change events and the fan-out of snapshots and deltas to subscribers

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

use crate::model::{EdgeView, NetworkSnapshot};

/// Free-form attributes attached to a change, e.g. the applied multiplier
pub type EventContext = Map<String, Value>;

/// One edge mutation, numbered in the order it was applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeChange {
    pub sequence: u64,
    pub edge: EdgeView,
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub context: EventContext,
}

/// Message delivered to a subscriber: one snapshot first, then deltas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphMessage {
    Snapshot(NetworkSnapshot),
    EdgeUpdated(EdgeChange),
}

struct Subscriber {
    id: u64,
    modes: Option<BTreeSet<String>>,
    sender: mpsc::Sender<GraphMessage>,
    lagged: Arc<AtomicBool>,
}

impl Subscriber {
    fn wants(&self, mode: &str) -> bool {
        self.modes.as_ref().is_none_or(|modes| modes.contains(mode))
    }
}

#[derive(Default)]
struct Hub {
    sequence: u64,
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Numbers edge changes and forwards them to bounded subscriber queues.
///
/// A subscriber whose queue is full is disconnected and flagged as lagged
/// instead of silently missing events; it has to subscribe again to get a
/// fresh snapshot.
#[derive(Default)]
pub(crate) struct Publisher {
    hub: Mutex<Hub>,
}

impl Publisher {
    fn hub(&self) -> std::sync::MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assigns the next sequence number to a change and delivers it.
    /// Called while the writer still holds the mode's write lock.
    pub(crate) fn publish(&self, edge: EdgeView, context: EventContext) -> EdgeChange {
        let mut hub = self.hub();
        hub.sequence += 1;
        let change = EdgeChange {
            sequence: hub.sequence,
            edge,
            context,
        };

        hub.subscribers.retain(|subscriber| {
            if !subscriber.wants(&change.edge.mode) {
                return true;
            }
            match subscriber
                .sender
                .try_send(GraphMessage::EdgeUpdated(change.clone()))
            {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Subscriber {} fell behind at sequence {}, disconnecting",
                        subscriber.id, change.sequence
                    );
                    subscriber.lagged.store(true, Ordering::Release);
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Subscriber {} went away", subscriber.id);
                    false
                }
            }
        });
        change
    }

    /// Registers a subscriber and queues its initial snapshot.
    ///
    /// The caller must hold read locks on every mode so that no change can be
    /// published between capturing the snapshot and registering the queue.
    pub(crate) fn register(
        &self,
        modes: Option<BTreeSet<String>>,
        capacity: usize,
        capture: impl FnOnce(u64) -> NetworkSnapshot,
    ) -> Subscription {
        let mut hub = self.hub();
        let snapshot = capture(hub.sequence);
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        // A fresh channel always has room for the first message
        let _ = sender.try_send(GraphMessage::Snapshot(snapshot));

        hub.next_id += 1;
        let id = hub.next_id;
        let lagged = Arc::new(AtomicBool::new(false));
        hub.subscribers.push(Subscriber {
            id,
            modes,
            sender,
            lagged: Arc::clone(&lagged),
        });
        debug!("Registered subscriber {id} ({} active)", hub.subscribers.len());
        Subscription {
            id,
            receiver,
            lagged,
        }
    }

    pub(crate) fn current_sequence(&self) -> u64 {
        self.hub().sequence
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.hub()
            .subscribers
            .iter()
            .filter(|s| !s.sender.is_closed())
            .count()
    }
}

/// Receiving end of a subscription
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<GraphMessage>,
    lagged: Arc<AtomicBool>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next message; `None` once the store dropped this subscriber and the
    /// queue is drained
    pub async fn recv(&mut self) -> Option<GraphMessage> {
        self.receiver.recv().await
    }

    /// Blocking variant of [`Subscription::recv`] for use outside async code
    pub fn blocking_recv(&mut self) -> Option<GraphMessage> {
        self.receiver.blocking_recv()
    }

    pub fn try_recv(&mut self) -> Option<GraphMessage> {
        match self.receiver.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// True if the store disconnected this subscriber because its queue was full
    pub fn is_lagged(&self) -> bool {
        self.lagged.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn edge(mode: &str) -> EdgeView {
        EdgeView {
            mode: mode.to_string(),
            source: "a".to_string(),
            target: "b".to_string(),
            key: "k".to_string(),
            default_weight: 60.0,
            current_weight: 90.0,
            distance_km: 1.0,
            speed_kmh: None,
            connector: None,
            metadata: None,
        }
    }

    fn empty_snapshot(sequence: u64) -> NetworkSnapshot {
        NetworkSnapshot {
            sequence,
            graphs: BTreeMap::new(),
        }
    }

    #[test]
    fn snapshot_comes_first_then_later_changes() {
        let publisher = Publisher::default();
        publisher.publish(edge("bus"), EventContext::new());
        let mut subscription = publisher.register(None, 8, empty_snapshot);
        publisher.publish(edge("bus"), EventContext::new());

        match subscription.try_recv() {
            Some(GraphMessage::Snapshot(snapshot)) => assert_eq!(snapshot.sequence, 1),
            other => panic!("expected snapshot, got {other:?}"),
        }
        match subscription.try_recv() {
            Some(GraphMessage::EdgeUpdated(change)) => assert_eq!(change.sequence, 2),
            other => panic!("expected change, got {other:?}"),
        }
        assert!(subscription.try_recv().is_none());
    }

    #[test]
    fn mode_filter_skips_other_modes() {
        let publisher = Publisher::default();
        let modes = BTreeSet::from(["tram".to_string()]);
        let mut subscription = publisher.register(Some(modes), 8, empty_snapshot);
        publisher.publish(edge("bus"), EventContext::new());
        publisher.publish(edge("tram"), EventContext::new());

        assert!(matches!(subscription.try_recv(), Some(GraphMessage::Snapshot(_))));
        match subscription.try_recv() {
            Some(GraphMessage::EdgeUpdated(change)) => assert_eq!(change.edge.mode, "tram"),
            other => panic!("expected tram change, got {other:?}"),
        }
    }

    #[test]
    fn full_queue_disconnects_instead_of_dropping_events() {
        let publisher = Publisher::default();
        let mut subscription = publisher.register(None, 2, empty_snapshot);
        for _ in 0..3 {
            publisher.publish(edge("bus"), EventContext::new());
        }
        assert!(subscription.is_lagged());
        assert_eq!(publisher.subscriber_count(), 0);

        // What was queued before the overflow is still delivered, in order
        assert!(matches!(subscription.try_recv(), Some(GraphMessage::Snapshot(_))));
        assert!(matches!(
            subscription.try_recv(),
            Some(GraphMessage::EdgeUpdated(EdgeChange { sequence: 1, .. }))
        ));
        assert!(subscription.try_recv().is_none());
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        let publisher = Publisher::default();
        let subscription = publisher.register(None, 4, empty_snapshot);
        drop(subscription);
        publisher.publish(edge("bus"), EventContext::new());
        assert_eq!(publisher.subscriber_count(), 0);
        assert_eq!(publisher.current_sequence(), 1);
    }

    #[test]
    fn messages_serialize_with_a_type_tag() {
        let change = EdgeChange {
            sequence: 7,
            edge: edge("bus"),
            context: EventContext::new(),
        };
        let json = serde_json::to_value(GraphMessage::EdgeUpdated(change)).unwrap();
        assert_eq!(json["type"], "edge_updated");
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["edge"]["current_weight"], 90.0);
        assert!(json.get("context").is_none());
    }
}
