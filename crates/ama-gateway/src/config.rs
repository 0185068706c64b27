use std::time::Duration;

/// Timing and capacity knobs for the room gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bound on delivering one event to one subscriber.
    pub delivery_timeout: Duration,
    /// How often the server pings each connection.
    pub ping_interval: Duration,
    /// A connection with no inbound frame for this long is dropped.
    pub read_timeout: Duration,
    /// Bound on writing a single ping frame.
    pub ping_write_timeout: Duration,
    /// Bound on the close handshake; past it the socket is simply dropped.
    pub close_timeout: Duration,
    /// Events waiting for the broadcast worker. Publishing onto a full queue drops the event.
    pub queue_capacity: usize,
    /// Broadcasts the worker runs at once.
    pub max_in_flight: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(2),
            ping_interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            ping_write_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            queue_capacity: 1024,
            max_in_flight: 64,
        }
    }
}
