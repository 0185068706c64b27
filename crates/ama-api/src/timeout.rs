//! Request deadline guard.
//!
//! The handler runs on its own task. When the deadline passes first the
//! caller gets 408 and the task is left to finish on its own; its
//! [`Deadline`] token is cancelled so cooperative handlers can stop early.
//! Anything it writes after that point is discarded.

use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ApiError;

pub const API_TIMEOUT: Duration = Duration::from_secs(30);
pub const GENERAL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct RequestTimeout(pub Duration);

/// Inserted into request extensions; cancelled once the caller has been
/// answered with 408.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    token: CancellationToken,
}

impl Deadline {
    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn expired(&self) {
        self.token.cancelled().await
    }
}

pub async fn guard(
    State(RequestTimeout(limit)): State<RequestTimeout>,
    mut req: Request,
    next: Next,
) -> Response {
    let deadline = Deadline::default();
    req.extensions_mut().insert(deadline.clone());

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let handler = tokio::spawn(next.run(req));

    match tokio::time::timeout(limit, handler).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => ApiError::Internal(anyhow::anyhow!(
            "handler task for {} {} failed: {}",
            method,
            path,
            e
        ))
        .into_response(),
        Err(_) => {
            warn!(%method, %path, timeout = ?limit, "request timed out");
            deadline.token.cancel();
            ApiError::Timeout.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{middleware, Extension, Router};
    use http_body_util::BodyExt;
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    fn router(limit: Duration) -> Router {
        Router::new()
            .route("/fast", get(|| async { "done" }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(120)).await;
                    "late"
                }),
            )
            .layer(middleware::from_fn_with_state(RequestTimeout(limit), guard))
    }

    #[tokio::test(start_paused = true)]
    async fn fast_handler_passes_through() {
        let res = router(API_TIMEOUT)
            .oneshot(Request::get("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"done");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_gets_408() {
        let res = router(API_TIMEOUT)
            .oneshot(Request::get("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"request timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_signalled_to_the_handler() {
        let (tx, rx) = oneshot::channel();
        let tx = std::sync::Arc::new(std::sync::Mutex::new(Some(tx)));

        let app = Router::new()
            .route(
                "/watch",
                get(move |Extension(deadline): Extension<Deadline>| {
                    let tx = tx.clone();
                    async move {
                        deadline.expired().await;
                        if let Some(tx) = tx.lock().unwrap().take() {
                            let _ = tx.send(deadline.is_expired());
                        }
                        "ignored"
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(
                RequestTimeout(Duration::from_secs(1)),
                guard,
            ));

        let res = app
            .oneshot(Request::get("/watch").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(rx.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn upgrade_header_does_not_lift_the_deadline() {
        let res = router(API_TIMEOUT)
            .oneshot(
                Request::get("/slow")
                    .header(axum::http::header::UPGRADE, "websocket")
                    .header(axum::http::header::CONNECTION, "upgrade")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_handler_is_500() {
        let app = Router::new()
            .route(
                "/boom",
                get(|| async {
                    if true {
                        panic!("handler bug");
                    }
                    "unreachable"
                }),
            )
            .layer(middleware::from_fn_with_state(RequestTimeout(API_TIMEOUT), guard));

        let res = app
            .oneshot(Request::get("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"something went wrong");
    }
}
