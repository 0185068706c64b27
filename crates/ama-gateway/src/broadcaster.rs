use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use ama_types::events::Event;

use crate::config::GatewayConfig;
use crate::registry::Registry;

/// Fire-and-forget front of the registry, used by request handlers.
///
/// Publishing never waits on delivery: events go onto a bounded queue drained
/// by one worker task, which runs at most `max_in_flight` fan-outs at a time.
#[derive(Clone)]
pub struct Broadcaster {
    tx: mpsc::Sender<Event>,
    registry: Registry,
}

impl Broadcaster {
    /// Start the worker on the current runtime. It stops once every
    /// `Broadcaster` clone has been dropped and the queue is drained.
    pub fn spawn(registry: Registry, config: &GatewayConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        tokio::spawn(run_worker(rx, registry.clone(), config.max_in_flight.max(1)));
        Self { tx, registry }
    }

    /// Queue an event for delivery. Returns false if it was dropped.
    pub fn publish(&self, event: Event) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(room_id = %event.room_id, kind = %event.kind(), "broadcast queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                warn!(room_id = %event.room_id, kind = %event.kind(), "broadcast worker stopped, dropping event");
                false
            }
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

async fn run_worker(mut rx: mpsc::Receiver<Event>, registry: Registry, max_in_flight: usize) {
    let permits = Arc::new(Semaphore::new(max_in_flight));

    while let Some(event) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let registry = registry.clone();
        tokio::spawn(async move {
            let report = registry.broadcast(&event).await;
            trace!(
                room_id = %event.room_id,
                kind = %event.kind(),
                delivered = report.delivered,
                disconnected = report.disconnected,
                "broadcast finished"
            );
            drop(permit);
        });
    }

    debug!("broadcast worker stopped");
}
