use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::future::BoxFuture;
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Write half of a live connection, as seen by the registry.
///
/// Implementations must tolerate being dropped mid-write: the broadcaster
/// abandons a write that exceeds its delivery timeout.
pub trait EventSink: Send + Sync + 'static {
    /// Write one text frame.
    fn send_text(&self, text: Utf8Bytes) -> BoxFuture<'_, anyhow::Result<()>>;

    /// Write a ping control frame.
    fn send_ping(&self) -> BoxFuture<'_, anyhow::Result<()>>;

    /// Best-effort close handshake. May never finish if the peer stopped
    /// reading; callers bound it with a timeout.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Write half of an axum WebSocket, shared between the broadcaster and the
/// keepalive loop of the connection that owns it.
pub struct WsSink {
    inner: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsSink {
    pub fn new(sender: SplitSink<WebSocket, Message>) -> Self {
        Self {
            inner: Mutex::new(sender),
        }
    }
}

impl EventSink for WsSink {
    fn send_text(&self, text: Utf8Bytes) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.inner.lock().await.send(Message::Text(text)).await?;
            Ok(())
        })
    }

    fn send_ping(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.inner.lock().await.send(Message::Ping(Bytes::new())).await?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut sender = self.inner.lock().await;
            // Errors are expected when the peer is already gone
            if let Err(e) = sender.send(Message::Close(None)).await {
                debug!("close frame not sent: {}", e);
            }
            let _ = sender.close().await;
        })
    }
}
