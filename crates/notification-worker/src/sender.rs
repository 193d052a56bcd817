//! 推送发送器
//!
//! 通过 `PushProvider` trait 抽象推送服务：接收目标令牌与载荷，成功返回推送服务分配的
//! 消息标识，失败返回错误。本模块不做重试，每个接收者每个事件只尝试一次。
//!
//! - `FcmPushProvider`：Firebase Cloud Messaging HTTP v1
//! - `LogPushProvider`：模拟发送（仅记录日志），用于本地开发

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chat_push_shared::config::PushConfig;
use chat_push_shared::error::ChatPushError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::NotificationError;
use crate::models::NotificationPayload;

/// 推送服务接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// 发送推送，成功返回推送服务的消息标识
    async fn send(
        &self,
        token: &str,
        payload: &NotificationPayload,
    ) -> Result<String, NotificationError>;

    fn name(&self) -> &'static str;
}

/// 日志中只保留令牌前缀
pub fn token_hint(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    if prefix.len() < token.len() {
        format!("{prefix}…")
    } else {
        prefix
    }
}

// ---------------------------------------------------------------------------
// FCM HTTP v1
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Debug, Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
    android: FcmAndroidConfig<'a>,
    data: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct FcmAndroidConfig<'a> {
    notification: FcmAndroidNotification<'a>,
}

#[derive(Debug, Serialize)]
struct FcmAndroidNotification<'a> {
    channel_id: &'a str,
    notification_priority: &'static str,
    default_sound: bool,
    icon: &'a str,
}

#[derive(Debug, Deserialize)]
struct FcmResponse {
    /// 形如 projects/{project}/messages/{id}
    name: String,
}

impl<'a> FcmRequest<'a> {
    fn new(token: &'a str, payload: &'a NotificationPayload) -> Self {
        Self {
            message: FcmMessage {
                token,
                notification: FcmNotification {
                    title: &payload.title,
                    body: &payload.body,
                },
                android: FcmAndroidConfig {
                    notification: FcmAndroidNotification {
                        channel_id: &payload.android.channel_id,
                        notification_priority: payload.android.priority.as_fcm_str(),
                        default_sound: payload.android.default_sound,
                        icon: &payload.android.icon,
                    },
                },
                data: &payload.data,
            },
        }
    }
}

/// Firebase Cloud Messaging 推送
pub struct FcmPushProvider {
    client: reqwest::Client,
    url: String,
    access_token: String,
}

impl FcmPushProvider {
    pub fn new(config: &PushConfig) -> Result<Self, NotificationError> {
        let access_token = config
            .access_token
            .clone()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ChatPushError::Internal("push.access_token 未配置".to_string()))?;

        if config.project_id.is_empty() {
            return Err(ChatPushError::Internal("push.project_id 未配置".to_string()).into());
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| ChatPushError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        let url = format!(
            "{}/v1/projects/{}/messages:send",
            config.endpoint.trim_end_matches('/'),
            config.project_id
        );

        info!(url = %url, "FCM 推送发送器已初始化");

        Ok(Self {
            client,
            url,
            access_token,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushProvider for FcmPushProvider {
    async fn send(
        &self,
        token: &str,
        payload: &NotificationPayload,
    ) -> Result<String, NotificationError> {
        debug!(token = %token_hint(token), title = %payload.title, "FCM 推送发送中");

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.access_token)
            .json(&FcmRequest::new(token, payload))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotificationError::from(ChatPushError::ExternalServiceTimeout {
                        service: "fcm".to_string(),
                    })
                } else {
                    NotificationError::SendFailed {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::ProviderRejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: FcmResponse = response
            .json()
            .await
            .map_err(|e| NotificationError::DeserializationFailed(e.to_string()))?;

        Ok(body.name)
    }

    fn name(&self) -> &'static str {
        "fcm"
    }
}

// ---------------------------------------------------------------------------
// 模拟发送
// ---------------------------------------------------------------------------

/// 模拟推送发送器
///
/// 不访问网络，生成一个本地消息标识并记录日志。
pub struct LogPushProvider;

#[async_trait]
impl PushProvider for LogPushProvider {
    async fn send(
        &self,
        token: &str,
        payload: &NotificationPayload,
    ) -> Result<String, NotificationError> {
        let message_id = format!("projects/local/messages/{}", Uuid::now_v7());

        info!(
            provider = "log",
            token = %token_hint(token),
            message_id = %message_id,
            title = %payload.title,
            body = %payload.body,
            "模拟发送推送通知"
        );

        Ok(message_id)
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
