use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{decode, DecodingKey, Validation};
use tracing::{debug, warn};
use uuid::Uuid;

use ama_types::api::Claims;

use crate::error::{ApiError, Result};
use crate::sessions::{UserSession, USER_SESSION_COOKIE};
use crate::state::AppState;

pub const HOST_TOKEN_HEADER: &str = "x-host-token";

/// Caller identity from a bearer token. Anonymous when absent or invalid.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub user_id: Option<String>,
}

fn bearer_identity(req: &Request, secret: &str) -> Identity {
    let Some(token) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return Identity::default();
    };

    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(data) => Identity {
            user_id: Some(data.claims.sub),
        },
        Err(e) => {
            debug!("ignoring invalid bearer token: {}", e);
            Identity::default()
        }
    }
}

pub async fn identify(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let identity = match state.jwt_secret.as_deref() {
        Some(secret) => bearer_identity(&req, secret),
        None => Identity::default(),
    };
    req.extensions_mut().insert(identity);
    next.run(req).await
}

/// Rate limit key: the authenticated user, else the peer address.
fn client_key(req: &Request) -> String {
    if let Some(user_id) = req
        .extensions()
        .get::<Identity>()
        .and_then(|i| i.user_id.as_deref())
    {
        return format!("user:{}", user_id);
    }
    match req.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => addr.ip().to_string(),
        None => "unknown".to_owned(),
    }
}

pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response> {
    let key = client_key(&req);
    if !state.rate_limiter.allow(&key) {
        warn!(client = %key, path = %req.uri().path(), "rate limited");
        return Err(ApiError::TooManyRequests);
    }
    Ok(next.run(req).await)
}

/// Attach a user session to every request and refresh its cookie.
pub async fn user_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let presented = jar.get(USER_SESSION_COOKIE).map(|c| c.value().to_owned());
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let sessions = state.sessions.clone();
    let session: UserSession = tokio::task::spawn_blocking(move || {
        sessions.resolve(presented.as_deref(), user_agent.as_deref())
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("session task failed: {}", e)))??;

    let cookie = state.sessions.session_cookie(&session.token);
    req.extensions_mut().insert(session);

    let mut res = next.run(req).await;
    // Handlers that manage the cookie themselves (logout) take precedence
    if !res.headers().contains_key(header::SET_COOKIE) {
        if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
            res.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    Ok(res)
}

/// Gate host-only routes on the `X-Host-Token` header.
pub async fn require_host(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    req: Request,
    next: Next,
) -> Result<Response> {
    let room_id = params
        .get("room_id")
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or(ApiError::BadRequest("invalid room id"))?;

    let token = req
        .headers()
        .get(HOST_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::Unauthorized("host token required"))?;

    if !state.hosts.is_host(room_id, token) {
        warn!(%room_id, "rejected host token");
        return Err(ApiError::Forbidden("invalid host token"));
    }

    Ok(next.run(req).await)
}
