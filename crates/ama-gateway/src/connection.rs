use std::fmt;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Stream, StreamExt};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::registry::{Registry, Subscription};
use crate::sink::{EventSink, WsSink};

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// The registry cancelled it: failed broadcast delivery or server shutdown.
    Cancelled,
    ClientClosed,
    PingFailed,
    /// Nothing arrived from the peer within the read deadline.
    ReadTimeout,
    TransportError,
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Cancelled => "cancelled",
            Self::ClientClosed => "client closed",
            Self::PingFailed => "ping failed",
            Self::ReadTimeout => "read timeout",
            Self::TransportError => "transport error",
        };
        f.write_str(reason)
    }
}

/// Serve one subscriber of a room until it is cancelled, times out, or goes away.
///
/// The connection is registered for the whole call and unregistered before
/// the socket is closed, on every exit path.
pub async fn serve(socket: WebSocket, room_id: Uuid, registry: Registry, config: GatewayConfig) {
    let (sender, receiver) = socket.split();
    let sink = Arc::new(WsSink::new(sender));
    serve_stream(sink, receiver, room_id, registry, &config).await;
}

/// Transport-independent body of [`serve`]. Returns why the connection ended.
async fn serve_stream<S, E>(
    sink: Arc<dyn EventSink>,
    mut receiver: S,
    room_id: Uuid,
    registry: Registry,
    config: &GatewayConfig,
) -> Disconnect
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let subscription = registry.register(room_id, sink.clone());
    let connection_id = subscription.id();
    info!(
        %room_id,
        %connection_id,
        total_subscribers = registry.subscriber_count(room_id),
        "client registered"
    );

    let reason = run_keepalive(&subscription, sink.as_ref(), &mut receiver, config).await;

    // Make sure nothing else is waiting on this connection before tearing it down
    subscription.cancel();
    drop(subscription);

    // A peer that stopped reading can hold the close frame forever
    if tokio::time::timeout(config.close_timeout, sink.close()).await.is_err() {
        debug!(%room_id, %connection_id, "close handshake timed out, dropping socket");
    }
    drop(sink);
    drop(receiver);

    info!(
        %room_id,
        %connection_id,
        %reason,
        remaining_subscribers = registry.subscriber_count(room_id),
        "client disconnected"
    );
    reason
}

/// Ping on a fixed interval and watch the read side until the connection ends.
async fn run_keepalive<S, E>(
    subscription: &Subscription,
    sink: &dyn EventSink,
    receiver: &mut S,
    config: &GatewayConfig,
) -> Disconnect
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let room_id = subscription.room_id();
    let connection_id = subscription.id();

    let mut heartbeat = tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    let read_deadline = sleep(config.read_timeout);
    tokio::pin!(read_deadline);

    loop {
        tokio::select! {
            _ = subscription.cancelled() => return Disconnect::Cancelled,

            _ = heartbeat.tick() => {
                let ping = tokio::time::timeout(config.ping_write_timeout, sink.send_ping());
                tokio::select! {
                    _ = subscription.cancelled() => return Disconnect::Cancelled,
                    outcome = ping => match outcome {
                        Ok(Ok(())) => trace!(%room_id, %connection_id, "ping sent"),
                        Ok(Err(e)) => {
                            debug!(%room_id, %connection_id, "failed to send ping: {}", e);
                            return Disconnect::PingFailed;
                        }
                        Err(_) => {
                            debug!(%room_id, %connection_id, "ping write timed out");
                            return Disconnect::PingFailed;
                        }
                    },
                }
            }

            _ = &mut read_deadline => {
                warn!(%room_id, %connection_id, "no pong within read deadline, dropping connection");
                return Disconnect::ReadTimeout;
            }

            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None => return Disconnect::ClientClosed,
                    Some(Ok(message)) => {
                        if let Message::Text(text) = &message {
                            debug!(%room_id, %connection_id, len = text.len(), "ignoring client message");
                        }
                        // Any inbound frame proves the peer is alive
                        read_deadline.as_mut().reset(Instant::now() + config.read_timeout);
                    }
                    Some(Err(e)) => {
                        debug!(%room_id, %connection_id, "read error: {}", e);
                        return Disconnect::TransportError;
                    }
                }
            }
        }
    }
}
