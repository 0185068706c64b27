use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use tracing::warn;
use uuid::Uuid;

use ama_types::api::ReactionCountResponse;
use ama_types::events::Event;

use crate::error::{ApiError, Result};
use crate::sessions::UserSession;
use crate::state::AppState;

pub const REACTION_TYPE: &str = "like";

pub async fn react(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(session): Extension<UserSession>,
) -> Result<impl IntoResponse> {
    let count = state
        .db_call(move |db| {
            let (room, message) = (room_id.to_string(), message_id.to_string());
            let Some(count) = db.react_to_message(&room, &message)? else {
                return Ok(None);
            };
            // The counter is authoritative; tracking is best-effort
            if let Err(e) = db.add_user_reaction(&session.id, &room, &message, REACTION_TYPE) {
                warn!(%message_id, "failed to track reaction: {:#}", e);
            }
            Ok(Some(count))
        })
        .await?
        .ok_or(ApiError::NotFound("message not found"))?;

    state
        .broadcaster
        .publish(Event::reaction_increased(room_id, message_id, count));
    Ok(Json(ReactionCountResponse { count }))
}

pub async fn unreact(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(session): Extension<UserSession>,
) -> Result<impl IntoResponse> {
    let count = state
        .db_call(move |db| {
            let (room, message) = (room_id.to_string(), message_id.to_string());
            let Some(count) = db.remove_reaction_from_message(&room, &message)? else {
                return Ok(None);
            };
            if let Err(e) = db.remove_user_reaction(&session.id, &message, REACTION_TYPE) {
                warn!(%message_id, "failed to untrack reaction: {:#}", e);
            }
            Ok(Some(count))
        })
        .await?
        .ok_or(ApiError::NotFound("message not found"))?;

    state
        .broadcaster
        .publish(Event::reaction_decreased(room_id, message_id, count));
    Ok(Json(ReactionCountResponse { count }))
}
