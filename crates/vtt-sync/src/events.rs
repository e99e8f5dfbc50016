//! Typed publish/subscribe for sync notifications.
//!
//! Every notification goes to the all-events topic. Metrics and quality
//! changes are also published on their own typed topics so a HUD can listen
//! to just those.

use std::fmt;
use std::net::SocketAddr;

use vtt_net::{Category, EntityId, GameEvent, PlayerInfo, RoomInfo, Sequence};

use crate::monitor::{NetworkMetrics, QualityChange};
use crate::reconciliation::ReconcileReport;

/// Handle returned by [`Topic::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Subscriber callback.
pub type Handler<E> = Box<dyn FnMut(&E) + Send>;

/// Subscribers for one event type, called in subscription order.
pub struct Topic<E> {
    next_id: u64,
    handlers: Vec<(SubscriptionId, Handler<E>)>,
}

impl<E> Default for Topic<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            handlers: Vec::new(),
        }
    }
}

impl<E> fmt::Debug for Topic<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("subscribers", &self.handlers.len())
            .finish()
    }
}

impl<E> Topic<E> {
    /// Register a handler.
    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&E) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, Box::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(sub, _)| *sub != id);
        self.handlers.len() != before
    }

    /// Call every handler.
    pub fn publish(&mut self, event: &E) {
        for (_, handler) in &mut self.handlers {
            handler(event);
        }
    }

    /// Number of handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// No handlers.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Notifications emitted by [`crate::SyncClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Link up.
    Connected {
        /// Server address.
        addr: SocketAddr,
    },
    /// Link down. Confirmed state is stale until the next full sync.
    Disconnected {
        /// Cause.
        reason: String,
    },
    /// This client created a room and is its game master.
    RoomCreated(RoomInfo),
    /// This client joined a room.
    RoomJoined {
        /// The room.
        room: RoomInfo,
        /// The local player as the server sees it.
        player: PlayerInfo,
    },
    /// Someone else joined.
    PlayerJoined(PlayerInfo),
    /// Someone left.
    PlayerLeft(PlayerInfo),
    /// A server event was written to confirmed state.
    RemoteEvent(GameEvent),
    /// A local action was predicted.
    Predicted {
        /// Correlation number.
        sequence: Sequence,
        /// Category touched.
        category: Category,
        /// Entity touched.
        entity_id: EntityId,
    },
    /// The server confirmed a local action.
    Confirmed {
        /// Correlation number.
        sequence: Sequence,
    },
    /// Confirmed state was replaced by a correction.
    StateCorrected(ReconcileReport),
    /// Confirmed state was replaced by a full sync.
    FullSync,
    /// A delta was applied.
    DeltaApplied,
    /// Metrics moved.
    NetworkMetricsUpdated(NetworkMetrics),
    /// The quality tier changed.
    QualityChanged(QualityChange),
    /// The server reported an error.
    ServerError(String),
    /// The transport reported a non-fatal error.
    TransportError(String),
}

impl SyncEvent {
    /// Whether the merged view may have changed.
    pub fn changes_state(&self) -> bool {
        matches!(
            self,
            SyncEvent::RemoteEvent(_)
                | SyncEvent::Predicted { .. }
                | SyncEvent::Confirmed { .. }
                | SyncEvent::StateCorrected(_)
                | SyncEvent::FullSync
                | SyncEvent::DeltaApplied
        )
    }
}

/// The facade's topics.
#[derive(Debug, Default)]
pub struct EventBus {
    /// Every notification.
    pub all: Topic<SyncEvent>,
    /// Metrics updates only.
    pub metrics: Topic<NetworkMetrics>,
    /// Quality tier changes only.
    pub quality: Topic<QualityChange>,
}

impl EventBus {
    /// Route an event to the typed topic it belongs to, then to `all`.
    pub fn publish(&mut self, event: SyncEvent) {
        match &event {
            SyncEvent::NetworkMetricsUpdated(metrics) => self.metrics.publish(metrics),
            SyncEvent::QualityChanged(change) => self.quality.publish(change),
            _ => {}
        }
        self.all.publish(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::monitor::NetworkQuality;

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut topic = Topic::<u32>::default();

        let sink = seen.clone();
        let id = topic.subscribe(move |n| sink.lock().unwrap().push(*n));
        topic.publish(&1);
        assert!(topic.unsubscribe(id));
        assert!(!topic.unsubscribe(id));
        topic.publish(&2);

        assert_eq!(*seen.lock().unwrap(), [1]);
        assert!(topic.is_empty());
    }

    #[test]
    fn test_handlers_called_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut topic = Topic::<&'static str>::default();
        for tag in ["a", "b"] {
            let sink = seen.clone();
            topic.subscribe(move |_| sink.lock().unwrap().push(tag));
        }
        topic.publish(&"x");
        assert_eq!(*seen.lock().unwrap(), ["a", "b"]);
    }

    #[test]
    fn test_bus_routes_typed_topics() {
        let mut bus = EventBus::default();
        let quality = Arc::new(Mutex::new(None));
        let all = Arc::new(Mutex::new(0));

        let sink = quality.clone();
        bus.quality.subscribe(move |c: &QualityChange| *sink.lock().unwrap() = Some(c.to));
        let count = all.clone();
        bus.all.subscribe(move |_| *count.lock().unwrap() += 1);

        bus.publish(SyncEvent::QualityChanged(QualityChange {
            from: NetworkQuality::Fair,
            to: NetworkQuality::Poor,
        }));
        bus.publish(SyncEvent::FullSync);

        assert_eq!(*quality.lock().unwrap(), Some(NetworkQuality::Poor));
        assert_eq!(*all.lock().unwrap(), 2);
    }

    #[test]
    fn test_state_changing_events() {
        assert!(SyncEvent::DeltaApplied.changes_state());
        assert!(!SyncEvent::ServerError("x".into()).changes_state());
    }
}
