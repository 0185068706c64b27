use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use axum_extra::extract::cookie::CookieJar;
use tracing::{info, warn};
use uuid::Uuid;

use ama_db::models::RoomRow;
use ama_db::parse_timestamp;
use ama_types::api::{CreateRoomRequest, CreateRoomResponse, HostStatusResponse, RoomResponse};

use crate::error::{ApiError, Result};
use crate::middleware::HOST_TOKEN_HEADER;
use crate::sessions::UserSession;
use crate::state::AppState;

pub const MAX_THEME_LEN: usize = 255;

fn room_response(row: RoomRow) -> anyhow::Result<RoomResponse> {
    Ok(RoomResponse {
        id: row.id.parse()?,
        theme: row.theme,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

/// 404 unless the room exists.
pub(crate) async fn ensure_room(state: &AppState, room_id: Uuid) -> Result<()> {
    let exists = state
        .db_call(move |db| Ok(db.get_room(&room_id.to_string())?.is_some()))
        .await?;
    if exists {
        Ok(())
    } else {
        Err(ApiError::NotFound("room not found"))
    }
}

pub async fn create_room(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse> {
    let theme = req.theme.trim().to_owned();
    if theme.is_empty() || theme.len() > MAX_THEME_LEN {
        return Err(ApiError::BadRequest("theme must be 1-255 characters"));
    }

    let room_id = Uuid::new_v4();
    let session_id = session.id.clone();
    state
        .db_call(move |db| {
            let id = room_id.to_string();
            db.insert_room(&id, &theme)?;
            // Creator tracking is best-effort; the room itself is committed
            if let Err(e) = db.set_room_creator(&id, &session_id) {
                warn!(%room_id, "failed to record room creator: {:#}", e);
            }
            Ok(())
        })
        .await?;

    let host = state.hosts.issue_for_room(room_id);
    info!(%room_id, "room created");

    Ok((
        StatusCode::CREATED,
        Json(CreateRoomResponse {
            id: room_id,
            host_token: host.token,
        }),
    ))
}

pub async fn get_rooms(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let rows = state.db_call(|db| db.get_rooms()).await?;
    let rooms = rows
        .into_iter()
        .map(room_response)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Json(rooms))
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let row = state
        .db_call(move |db| db.get_room(&room_id.to_string()))
        .await?
        .ok_or(ApiError::NotFound("room not found"))?;
    Ok(Json(room_response(row)?))
}

/// Whether the caller holds the room's host token. Never rejects on a bad token.
pub async fn host_status(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    ensure_room(&state, room_id).await?;

    let is_host = headers
        .get(HOST_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|token| state.hosts.is_host(room_id, token));

    Ok(Json(HostStatusResponse { is_host, room_id }))
}

pub async fn revoke_host(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.hosts.revoke(room_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Rooms created from the caller's session.
pub async fn user_rooms(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
) -> Result<impl IntoResponse> {
    let rows = state
        .db_call(move |db| db.get_user_rooms(&session.token))
        .await?;
    let rooms = rows
        .into_iter()
        .map(room_response)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Json(rooms))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    jar: CookieJar,
) -> Result<impl IntoResponse> {
    let sessions = state.sessions.clone();
    let token = session.token.clone();
    tokio::task::spawn_blocking(move || {
        sessions.delete_session(&token)?;
        match sessions.clean_expired_sessions() {
            Ok(removed) if removed > 0 => info!("Logout: removed {} expired sessions", removed),
            Ok(_) => {}
            Err(e) => warn!("expired session cleanup failed: {:#}", e),
        }
        anyhow::Ok(())
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("logout task failed: {}", e)))??;

    let jar = jar.add(state.sessions.clear_cookie());
    Ok((StatusCode::NO_CONTENT, jar))
}
