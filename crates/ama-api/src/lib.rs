pub mod error;
pub mod hosts;
pub mod messages;
pub mod middleware;
pub mod rate_limit;
pub mod reactions;
pub mod rooms;
pub mod routes;
pub mod sessions;
pub mod state;
pub mod timeout;
mod token;

pub use error::ApiError;
pub use state::{AppState, AppStateInner};
