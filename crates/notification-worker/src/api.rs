//! 直接推送 HTTP 接口
//!
//! - `POST /notifications/direct`：向调用方给出的令牌发送一条推送
//! - `GET /health`：存活检查

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::direct::{DirectDispatcher, DirectNotificationRequest, DirectOutcome};
use crate::error::NotificationError;

#[derive(Clone)]
pub struct AppState {
    pub direct: Arc<DirectDispatcher>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectNotificationResponse {
    pub success: bool,
    pub message_id: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/notifications/direct", post(send_direct))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn send_direct(
    State(state): State<AppState>,
    Json(request): Json<DirectNotificationRequest>,
) -> Result<Response, NotificationError> {
    let response = match state.direct.send(&request).await? {
        DirectOutcome::Sent { message_id } => (
            StatusCode::OK,
            Json(DirectNotificationResponse {
                success: true,
                message_id,
            }),
        )
            .into_response(),
        DirectOutcome::Skipped => StatusCode::NO_CONTENT.into_response(),
    };
    Ok(response)
}

async fn health() -> &'static str {
    "OK"
}
