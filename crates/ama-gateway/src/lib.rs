pub mod broadcaster;
pub mod config;
pub mod connection;
pub mod registry;
pub mod sink;

pub use broadcaster::Broadcaster;
pub use config::GatewayConfig;
pub use registry::{BroadcastReport, ConnectionId, Registry, Subscription};
pub use sink::{EventSink, WsSink};
