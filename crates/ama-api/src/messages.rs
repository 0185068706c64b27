use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use tracing::debug;
use uuid::Uuid;

use ama_db::models::MessageRow;
use ama_db::parse_timestamp;
use ama_types::api::{CreateMessageRequest, CreateMessageResponse, MessageResponse};
use ama_types::events::Event;

use crate::error::{ApiError, Result};
use crate::rooms::ensure_room;
use crate::sessions::UserSession;
use crate::state::AppState;

pub const MAX_MESSAGE_LEN: usize = 1000;

fn message_response(row: MessageRow) -> anyhow::Result<MessageResponse> {
    Ok(MessageResponse {
        id: row.id.parse()?,
        room_id: row.room_id.parse()?,
        message: row.message,
        reaction_count: row.reaction_count,
        answered: row.answered,
        user_reacted: row.user_reacted,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

pub async fn create_message(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<impl IntoResponse> {
    let message = req.message.trim().to_owned();
    if message.is_empty() || message.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiError::BadRequest("message must be 1-1000 characters"));
    }

    ensure_room(&state, room_id).await?;

    let id = Uuid::new_v4();
    let stored = message.clone();
    state
        .db_call(move |db| db.insert_message(&id.to_string(), &room_id.to_string(), &stored))
        .await?;

    debug!(%room_id, message_id = %id, "message created");
    state
        .broadcaster
        .publish(Event::message_created(room_id, id, message));

    Ok((StatusCode::CREATED, Json(CreateMessageResponse { id })))
}

/// Messages of a room, each marked with whether the caller reacted.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(session): Extension<UserSession>,
) -> Result<impl IntoResponse> {
    ensure_room(&state, room_id).await?;

    let rows = state
        .db_call(move |db| {
            db.get_room_messages(&room_id.to_string(), Some(session.token.as_str()))
        })
        .await?;
    let messages = rows
        .into_iter()
        .map(message_response)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Json(messages))
}

pub async fn get_message(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let row = state
        .db_call(move |db| db.get_message(&room_id.to_string(), &message_id.to_string()))
        .await?
        .ok_or(ApiError::NotFound("message not found"))?;
    Ok(Json(message_response(row)?))
}

/// Host only; gated by `require_host`.
pub async fn mark_answered(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode> {
    let updated = state
        .db_call(move |db| {
            db.mark_message_as_answered(&room_id.to_string(), &message_id.to_string())
        })
        .await?;
    if !updated {
        return Err(ApiError::NotFound("message not found"));
    }

    state
        .broadcaster
        .publish(Event::message_answered(room_id, message_id));
    Ok(StatusCode::OK)
}
