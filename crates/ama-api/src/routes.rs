use std::time::Duration;

use axum::routing::{delete, get, patch, post};
use axum::{middleware, Router};

use crate::middleware::{identify, rate_limit, require_host, user_session};
use crate::state::AppState;
use crate::timeout::{self, RequestTimeout};
use crate::{messages, reactions, rooms};

/// The REST surface, meant to be nested under `/api`.
///
/// Layers run outermost first: deadline, identity, rate limit, session.
pub fn api_router(state: AppState, request_timeout: Duration) -> Router {
    let host_only = Router::new()
        .route(
            "/rooms/{room_id}/messages/{message_id}/answer",
            patch(messages::mark_answered),
        )
        .route("/rooms/{room_id}/host", delete(rooms::revoke_host))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_host));

    Router::new()
        .route("/rooms", post(rooms::create_room).get(rooms::get_rooms))
        .route("/rooms/{room_id}", get(rooms::get_room))
        .route("/rooms/{room_id}/host-status", get(rooms::host_status))
        .route(
            "/rooms/{room_id}/messages",
            post(messages::create_message).get(messages::get_messages),
        )
        .route(
            "/rooms/{room_id}/messages/{message_id}",
            get(messages::get_message),
        )
        .route(
            "/rooms/{room_id}/messages/{message_id}/react",
            patch(reactions::react).delete(reactions::unreact),
        )
        .route("/me/rooms", get(rooms::user_rooms))
        .route("/logout", post(rooms::logout))
        .merge(host_only)
        .layer(middleware::from_fn_with_state(state.clone(), user_session))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(middleware::from_fn_with_state(state.clone(), identify))
        .layer(middleware::from_fn_with_state(
            RequestTimeout(request_timeout),
            timeout::guard,
        ))
        .with_state(state)
}
