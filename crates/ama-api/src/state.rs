use std::sync::Arc;

use tracing::error;

use ama_db::Database;
use ama_gateway::Broadcaster;

use crate::error::ApiError;
use crate::hosts::HostSessionAuthority;
use crate::rate_limit::RateLimiter;
use crate::sessions::UserSessionManager;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub broadcaster: Broadcaster,
    pub hosts: HostSessionAuthority,
    pub sessions: UserSessionManager,
    pub rate_limiter: Arc<RateLimiter>,
    /// Secret for bearer identity tokens. None leaves every caller anonymous.
    pub jwt_secret: Option<String>,
}

impl AppStateInner {
    /// Run a blocking database call off the async runtime.
    pub async fn db_call<F, T>(self: &Arc<Self>, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let state = self.clone();
        tokio::task::spawn_blocking(move || f(&state.db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal(anyhow::anyhow!("database task failed"))
            })?
            .map_err(ApiError::Internal)
    }
}
