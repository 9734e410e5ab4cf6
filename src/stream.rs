//! Delivery of subscription messages to observers

use std::future::Future;
use std::ops::ControlFlow;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use transitpulse_core::store::{GraphMessage, Subscription};

/// Why a delivery loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEnd {
    /// The observer asked to stop
    Stopped,
    /// The observer fell behind and was disconnected by the publisher
    Lagged,
    /// The store was dropped
    Closed,
}

/// Feeds every message of `subscription` to `observer`, in order, until the
/// observer breaks or the subscription ends
pub async fn deliver<F, Fut>(mut subscription: Subscription, mut observer: F) -> DeliveryEnd
where
    F: FnMut(GraphMessage) -> Fut,
    Fut: Future<Output = ControlFlow<()>>,
{
    let id = subscription.id();
    while let Some(message) = subscription.recv().await {
        if observer(message).await.is_break() {
            debug!(subscriber = id, "Observer stopped the subscription");
            return DeliveryEnd::Stopped;
        }
    }
    if subscription.is_lagged() {
        warn!(subscriber = id, "Subscriber fell behind and was disconnected");
        DeliveryEnd::Lagged
    } else {
        DeliveryEnd::Closed
    }
}

/// Runs [`deliver`] on its own task so a slow observer never holds up others
pub fn spawn_delivery<F, Fut>(subscription: Subscription, observer: F) -> JoinHandle<DeliveryEnd>
where
    F: FnMut(GraphMessage) -> Fut + Send + 'static,
    Fut: Future<Output = ControlFlow<()>> + Send + 'static,
{
    tokio::spawn(deliver(subscription, observer))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;
    use transitpulse_core::model::{Edge, ModeGraph, Node};
    use transitpulse_core::store::{EdgePatch, GraphStore};

    use super::*;

    fn store() -> Arc<GraphStore> {
        let mut tram = ModeGraph::new("tram");
        tram.add_node(Node::new("X", 50.0, 19.0));
        tram.add_node(Node::new("Y", 50.0, 19.01));
        tram.add_edge("X", "Y", Edge::new("k", 60.0, 0.7)).unwrap();
        Arc::new(GraphStore::from_graphs([tram]).unwrap())
    }

    #[tokio::test]
    async fn observer_receives_snapshot_then_updates() {
        let store = store();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let delivery = spawn_delivery(store.subscribe(None, 8).unwrap(), move |message| {
            let tx = tx.clone();
            async move {
                let last = matches!(&message, GraphMessage::EdgeUpdated(c) if c.edge.current_weight > 100.0);
                let _ = tx.send(message);
                if last { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
            }
        });

        store
            .patch_edge("tram", "X", "Y", None, EdgePatch::Weight(90.0))
            .unwrap();
        store
            .patch_edge("tram", "X", "Y", None, EdgePatch::Weight(120.0))
            .unwrap();

        assert_eq!(delivery.await.unwrap(), DeliveryEnd::Stopped);
        assert!(matches!(rx.recv().await, Some(GraphMessage::Snapshot(_))));
        let mut sequences = Vec::new();
        while let Ok(GraphMessage::EdgeUpdated(change)) = rx.try_recv() {
            sequences.push(change.sequence);
        }
        assert_eq!(sequences.len(), 2);
        assert!(sequences[0] < sequences[1]);
    }

    #[tokio::test]
    async fn slow_observer_is_reported_as_lagged() {
        let store = store();
        let subscription = store.subscribe(None, 1).unwrap();
        // Queue holds the snapshot, so the first change overflows it
        store
            .patch_edge("tram", "X", "Y", None, EdgePatch::Weight(90.0))
            .unwrap();

        let end = deliver(subscription, |_| async { ControlFlow::Continue(()) }).await;
        assert_eq!(end, DeliveryEnd::Lagged);
        assert_eq!(store.subscriber_count(), 0);
    }
}
