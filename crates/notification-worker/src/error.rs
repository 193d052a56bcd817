//! 通知服务错误类型
//!
//! 定义推送发送、事件反序列化等场景的错误分类。
//! 扇出路径上的错误在接收者粒度被吸收为分发结果，只有直接推送会把错误返回给调用方。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    /// 网络层失败，请求未得到推送服务的响应
    #[error("通知发送失败: {reason}")]
    SendFailed { reason: String },

    /// 推送服务返回非 2xx 状态码
    #[error("推送服务拒绝请求: status={status}, body={body}")]
    ProviderRejected { status: u16, body: String },

    #[error("通知反序列化失败: {0}")]
    DeserializationFailed(String),

    #[error(transparent)]
    Shared(#[from] chat_push_shared::error::ChatPushError),
}

/// 直接推送接口的错误响应
///
/// 推送服务的原始错误只记录日志，调用方只得到通用提示。
impl IntoResponse for NotificationError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "直接推送请求处理失败");

        let body = json!({
            "success": false,
            "code": "INTERNAL",
            "message": "Chyba při odesílání notifikace",
        });

        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}
