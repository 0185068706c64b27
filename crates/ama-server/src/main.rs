use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use ama_api::hosts::{HOST_SESSION_TTL, HOST_SWEEP_INTERVAL};
use ama_server::{build_router, build_state, Config};

/// User sessions are swept far less often than they are read.
const USER_SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ama=debug,ama_server=debug,ama_api=debug,ama_gateway=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.jwt_secret.is_none() {
        info!("AMA_JWT_SECRET not set, every caller is anonymous");
    }

    let db = ama_db::Database::open(&config.db_path)?;
    let state = build_state(db, &config);

    // Background sweeps
    tokio::spawn(state.hosts.clone().run_sweep_loop(HOST_SWEEP_INTERVAL));
    tokio::spawn(
        Arc::clone(&state.rate_limiter).run_sweep_loop(config.rate_limit.sweep_interval),
    );
    tokio::spawn(state.sessions.clone().run_sweep_loop(USER_SESSION_SWEEP_INTERVAL));
    info!(
        "Host sessions live {}h, swept every {}m",
        HOST_SESSION_TTL.as_secs() / 3600,
        HOST_SWEEP_INTERVAL.as_secs() / 60
    );

    let registry = state.broadcaster.registry().clone();
    let app = build_router(state, &config);

    let addr = config.addr()?;
    info!("AMA server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let cancelled = registry.cancel_all();
        info!("Cancelled {} websocket subscribers", cancelled);
    })
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
