use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use futures_util::future::join_all;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ama_types::events::Event;

use crate::sink::EventSink;

pub type ConnectionId = Uuid;

/// A registered connection: where to write, and how to make it stop.
struct Subscriber {
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
}

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub disconnected: usize,
}

/// Live connections grouped by room.
///
/// A single mutex guards the room map. It is never held across a write:
/// broadcasts snapshot the room's subscribers, release the lock, then deliver.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    rooms: Mutex<HashMap<Uuid, HashMap<ConnectionId, Subscriber>>>,
    delivery_timeout: Duration,
}

impl Registry {
    pub fn new(delivery_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                rooms: Mutex::new(HashMap::new()),
                delivery_timeout,
            }),
        }
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<Uuid, HashMap<ConnectionId, Subscriber>>> {
        // The map holds no invariants a panicking holder could break halfway
        self.inner.rooms.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a connection to a room. The connection stays registered until the
    /// returned subscription is dropped or [`Registry::unregister`] is called.
    pub fn register(&self, room_id: Uuid, sink: Arc<dyn EventSink>) -> Subscription {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let total = {
            let mut rooms = self.rooms();
            let room = rooms.entry(room_id).or_default();
            room.insert(
                id,
                Subscriber {
                    sink,
                    cancel: cancel.clone(),
                },
            );
            room.len()
        };

        debug!(%room_id, connection_id = %id, total_subscribers = total, "connection registered");

        Subscription {
            registry: self.clone(),
            room_id,
            id,
            cancel,
        }
    }

    /// Remove a connection. Returns false if it was already gone.
    pub fn unregister(&self, room_id: Uuid, connection_id: ConnectionId) -> bool {
        let mut rooms = self.rooms();
        let Some(room) = rooms.get_mut(&room_id) else {
            return false;
        };
        let removed = room.remove(&connection_id).is_some();
        if room.is_empty() {
            rooms.remove(&room_id);
        }
        removed
    }

    pub fn subscriber_count(&self, room_id: Uuid) -> usize {
        self.rooms().get(&room_id).map_or(0, HashMap::len)
    }

    pub fn room_count(&self) -> usize {
        self.rooms().len()
    }

    /// Cancel every registered connection. Each serving routine then
    /// unregisters itself and closes its socket.
    pub fn cancel_all(&self) -> usize {
        let rooms = self.rooms();
        let mut cancelled = 0;
        for subscriber in rooms.values().flat_map(HashMap::values) {
            subscriber.cancel.cancel();
            cancelled += 1;
        }
        cancelled
    }

    /// Deliver an event to every connection registered in its room when the
    /// call starts. Deliveries run concurrently, each bounded by the delivery
    /// timeout. A subscriber whose write fails or times out is cancelled and
    /// removed; the others are unaffected.
    pub async fn broadcast(&self, event: &Event) -> BroadcastReport {
        let room_id = event.room_id;
        let kind = event.kind();

        let text = match event.to_json() {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                error!(%room_id, %kind, "failed to encode event: {}", e);
                return BroadcastReport::default();
            }
        };

        let targets: Vec<(ConnectionId, Arc<dyn EventSink>, CancellationToken)> = {
            let rooms = self.rooms();
            match rooms.get(&room_id) {
                Some(room) => room
                    .iter()
                    .map(|(id, s)| (*id, s.sink.clone(), s.cancel.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };

        if targets.is_empty() {
            debug!(%room_id, %kind, "no subscribers for room");
            return BroadcastReport::default();
        }

        debug!(%room_id, %kind, subscriber_count = targets.len(), "notifying clients");

        let timeout = self.inner.delivery_timeout;
        let deliveries = targets.into_iter().map(|(id, sink, cancel)| {
            let text = text.clone();
            async move {
                let outcome = tokio::time::timeout(timeout, sink.send_text(text)).await;
                (id, cancel, outcome)
            }
        });

        let mut report = BroadcastReport::default();
        for (id, cancel, outcome) in join_all(deliveries).await {
            match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => {
                    warn!(%room_id, %kind, connection_id = %id, "failed to send event to client: {}", e);
                }
                Err(_) => {
                    warn!(%room_id, %kind, connection_id = %id, "timeout sending event to client");
                }
            }
            cancel.cancel();
            self.unregister(room_id, id);
            report.disconnected += 1;
        }

        if report.disconnected > 0 {
            info!(
                %room_id,
                delivered = report.delivered,
                disconnected_count = report.disconnected,
                "some clients disconnected"
            );
        }

        report
    }
}

/// Proof of registration. Dropping it unregisters the connection, so every
/// exit path of the serving routine leaves the registry clean.
pub struct Subscription {
    registry: Registry,
    room_id: Uuid,
    id: ConnectionId,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    /// Handle that terminates the connection. Cancelling twice is a no-op.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(self.room_id, self.id);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use tokio::sync::mpsc;

    /// Collects every frame written to it.
    pub(crate) struct ChannelSink {
        tx: mpsc::UnboundedSender<String>,
    }

    impl ChannelSink {
        pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { tx }), rx)
        }
    }

    impl EventSink for ChannelSink {
        fn send_text(&self, text: Utf8Bytes) -> BoxFuture<'_, anyhow::Result<()>> {
            let sent = self.tx.send(text.as_str().to_owned());
            Box::pin(async move {
                sent.map_err(|_| anyhow::anyhow!("receiver gone"))
            })
        }

        fn send_ping(&self) -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn close(&self) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    /// A peer that never drains its socket.
    pub(crate) struct StalledSink;

    impl EventSink for StalledSink {
        fn send_text(&self, _text: Utf8Bytes) -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(futures_util::future::pending())
        }

        fn send_ping(&self) -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(futures_util::future::pending())
        }

        fn close(&self) -> BoxFuture<'_, ()> {
            Box::pin(futures_util::future::pending())
        }
    }

    pub(crate) struct BrokenSink;

    impl EventSink for BrokenSink {
        fn send_text(&self, _text: Utf8Bytes) -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async { Err(anyhow::anyhow!("connection reset")) })
        }

        fn send_ping(&self) -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async { Err(anyhow::anyhow!("connection reset")) })
        }

        fn close(&self) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    fn registry() -> Registry {
        Registry::new(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn broadcast_reaches_only_the_events_room() {
        let registry = registry();
        let r1 = Uuid::new_v4();
        let r2 = Uuid::new_v4();

        let (c1, mut rx1) = ChannelSink::new();
        let (c2, mut rx2) = ChannelSink::new();
        let (c3, mut rx3) = ChannelSink::new();
        let _s1 = registry.register(r1, c1);
        let _s2 = registry.register(r1, c2);
        let _s3 = registry.register(r2, c3);

        let message_id = Uuid::new_v4();
        let report = registry.broadcast(&Event::message_answered(r1, message_id)).await;
        assert_eq!(report, BroadcastReport { delivered: 2, disconnected: 0 });

        for rx in [&mut rx1, &mut rx2] {
            let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(frame["kind"], "message_answered");
            assert_eq!(frame["value"]["id"], message_id.to_string());
            assert!(rx.try_recv().is_err());
        }
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_subscriber_is_cancelled_and_removed() {
        let registry = registry();
        let room = Uuid::new_v4();

        let stalled = registry.register(room, Arc::new(StalledSink));
        let (healthy, mut rx) = ChannelSink::new();
        let _healthy = registry.register(room, healthy);

        let report = registry.broadcast(&Event::message_answered(room, Uuid::new_v4())).await;
        assert_eq!(report, BroadcastReport { delivered: 1, disconnected: 1 });
        assert!(stalled.is_cancelled());
        assert_eq!(registry.subscriber_count(room), 1);
        assert!(rx.try_recv().is_ok());

        // The stalled connection is no longer a delivery target
        let report = registry.broadcast(&Event::message_answered(room, Uuid::new_v4())).await;
        assert_eq!(report, BroadcastReport { delivered: 1, disconnected: 0 });
    }

    #[tokio::test]
    async fn write_error_cancels_subscriber() {
        let registry = registry();
        let room = Uuid::new_v4();
        let broken = registry.register(room, Arc::new(BrokenSink));

        let report = registry.broadcast(&Event::reaction_increased(room, Uuid::new_v4(), 1)).await;
        assert_eq!(report.disconnected, 1);
        assert!(broken.is_cancelled());
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = registry();
        let room = Uuid::new_v4();
        let (sink, _rx) = ChannelSink::new();
        let subscription = registry.register(room, sink);
        let id = subscription.id();

        assert!(registry.unregister(room, id));
        assert!(!registry.unregister(room, id));
        assert_eq!(registry.subscriber_count(room), 0);

        // Dropping after an explicit unregister is also harmless
        drop(subscription);
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn dropping_subscription_removes_empty_room() {
        let registry = registry();
        let room = Uuid::new_v4();
        let (a, _rx_a) = ChannelSink::new();
        let (b, _rx_b) = ChannelSink::new();

        let first = registry.register(room, a);
        let second = registry.register(room, b);
        assert_eq!(registry.subscriber_count(room), 2);

        drop(first);
        assert_eq!(registry.subscriber_count(room), 1);
        drop(second);
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn cancel_all_signals_every_connection() {
        let registry = registry();
        let (a, _rx_a) = ChannelSink::new();
        let (b, _rx_b) = ChannelSink::new();
        let first = registry.register(Uuid::new_v4(), a);
        let second = registry.register(Uuid::new_v4(), b);

        assert_eq!(registry.cancel_all(), 2);
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());

        // Cancelling an already-cancelled handle is safe
        first.cancel();
        assert!(first.is_cancelled());
    }

    #[tokio::test]
    async fn broadcast_to_empty_room_is_a_noop() {
        let report = registry().broadcast(&Event::message_answered(Uuid::new_v4(), Uuid::new_v4())).await;
        assert_eq!(report, BroadcastReport::default());
    }
}
