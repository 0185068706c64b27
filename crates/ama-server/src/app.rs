use std::sync::Arc;

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use ama_api::hosts::HostSessionAuthority;
use ama_api::rate_limit::RateLimiter;
use ama_api::routes::api_router;
use ama_api::sessions::UserSessionManager;
use ama_api::timeout::{self, RequestTimeout};
use ama_api::{ApiError, AppState, AppStateInner};
use ama_db::Database;
use ama_gateway::{connection, Broadcaster, GatewayConfig, Registry};

use crate::config::Config;

#[derive(Clone)]
struct SocketState {
    app: AppState,
    gateway: GatewayConfig,
}

/// Wire the shared components together and start the broadcast worker.
pub fn build_state(db: Database, config: &Config) -> AppState {
    let db = Arc::new(db);
    let registry = Registry::new(config.gateway.delivery_timeout);

    Arc::new(AppStateInner {
        db: db.clone(),
        broadcaster: Broadcaster::spawn(registry, &config.gateway),
        hosts: HostSessionAuthority::default(),
        sessions: UserSessionManager::new(db, config.secure_cookies),
        rate_limiter: Arc::new(RateLimiter::new(config.rate_limit)),
        jwt_secret: config.jwt_secret.clone(),
    })
}

pub fn build_router(state: AppState, config: &Config) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health))
        .layer(middleware::from_fn_with_state(
            RequestTimeout(config.general_timeout),
            timeout::guard,
        ));

    // Subscriptions are long-lived and carry no deadline
    let ws_routes = Router::new()
        .route("/subscribe/{room_id}", get(ws_upgrade))
        .with_state(SocketState {
            app: state.clone(),
            gateway: config.gateway.clone(),
        });

    Router::new()
        .nest("/api", api_router(state, config.request_timeout))
        .merge(health_routes)
        .merge(ws_routes)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "ama",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn ws_upgrade(
    State(state): State<SocketState>,
    Path(raw_room_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let room_id =
        Uuid::parse_str(&raw_room_id).map_err(|_| ApiError::BadRequest("invalid room id"))?;

    let exists = state
        .app
        .db_call(move |db| Ok(db.get_room(&room_id.to_string())?.is_some()))
        .await?;
    if !exists {
        return Err(ApiError::NotFound("room not found"));
    }

    info!(%room_id, "websocket connection attempt");

    let registry = state.app.broadcaster.registry().clone();
    let gateway = state.gateway;
    Ok(ws.on_upgrade(move |socket| connection::serve(socket, room_id, registry, gateway)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> Router {
        let config = Config::default();
        let state = build_state(Database::open_in_memory().unwrap(), &config);
        build_router(state, &config)
    }

    #[tokio::test]
    async fn health_reports_ok_with_request_id() {
        let res = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key("x-request-id"));

        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "ama");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let res = app()
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
