//! 直接推送
//!
//! 调用方直接给出目标令牌，不读取存储、不做偏好检查。
//! 与扇出不同，发送失败会作为错误返回给调用方。

use std::sync::Arc;

use chat_push_shared::observability::metrics;
use serde::Deserialize;
use tracing::{error, info};

use crate::error::NotificationError;
use crate::sender::{PushProvider, token_hint};
use crate::templates::{NotificationContent, NotificationTemplateEngine};

/// 直接推送请求，所有字段都可缺省
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectNotificationRequest {
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub fcm_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectOutcome {
    Sent { message_id: String },
    /// 请求没有携带有效令牌，未发送
    Skipped,
}

pub struct DirectDispatcher {
    provider: Arc<dyn PushProvider>,
}

impl DirectDispatcher {
    pub fn new(provider: Arc<dyn PushProvider>) -> Self {
        Self { provider }
    }

    pub async fn send(
        &self,
        request: &DirectNotificationRequest,
    ) -> Result<DirectOutcome, NotificationError> {
        let Some(token) = request.fcm_token.as_deref().filter(|t| !t.is_empty()) else {
            info!("直接推送请求缺少令牌，跳过");
            metrics::record_direct("skipped");
            return Ok(DirectOutcome::Skipped);
        };

        let content = NotificationContent::resolve(
            request.sender_name.as_deref(),
            request.message.as_deref(),
            None,
        );
        let payload = NotificationTemplateEngine::direct_payload(&content);

        match self.provider.send(token, &payload).await {
            Ok(message_id) => {
                info!(
                    token = %token_hint(token),
                    message_id = %message_id,
                    "直接推送发送成功"
                );
                metrics::record_direct("sent");
                Ok(DirectOutcome::Sent { message_id })
            }
            Err(e) => {
                error!(token = %token_hint(token), error = %e, "直接推送发送失败");
                metrics::record_direct("failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::MockPushProvider;
    use crate::templates::UNKNOWN_SENDER;

    fn request(token: Option<&str>) -> DirectNotificationRequest {
        DirectNotificationRequest {
            sender_name: Some("Petr".to_string()),
            message: Some("Jsi tam?".to_string()),
            fcm_token: token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_missing_token_skips_without_provider_call() {
        let mut provider = MockPushProvider::new();
        provider.expect_send().never();

        let dispatcher = DirectDispatcher::new(Arc::new(provider));
        assert_eq!(
            dispatcher.send(&request(None)).await.unwrap(),
            DirectOutcome::Skipped
        );
        assert_eq!(
            dispatcher.send(&request(Some(""))).await.unwrap(),
            DirectOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_send_uses_caller_message_as_body() {
        let mut provider = MockPushProvider::new();
        provider
            .expect_send()
            .withf(|token, payload| {
                token == "T9"
                    && payload.title == "Petr Vám posílá zprávu"
                    && payload.body == "Jsi tam?"
                    && !payload.data.contains_key("chatId")
            })
            .times(1)
            .returning(|_, _| Ok("projects/p/messages/9".to_string()));

        let dispatcher = DirectDispatcher::new(Arc::new(provider));
        let outcome = dispatcher.send(&request(Some("T9"))).await.unwrap();
        assert_eq!(
            outcome,
            DirectOutcome::Sent {
                message_id: "projects/p/messages/9".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_name_uses_placeholder() {
        let mut provider = MockPushProvider::new();
        provider
            .expect_send()
            .withf(|_, payload| {
                payload.title == format!("{UNKNOWN_SENDER} Vám posílá zprávu")
                    && payload.body.is_empty()
            })
            .times(1)
            .returning(|_, _| Ok("msg".to_string()));

        let dispatcher = DirectDispatcher::new(Arc::new(provider));
        let request = DirectNotificationRequest {
            fcm_token: Some("T1".to_string()),
            ..Default::default()
        };
        tokio_test::assert_ok!(dispatcher.send(&request).await);
    }

    #[tokio::test]
    async fn test_provider_failure_is_returned() {
        let mut provider = MockPushProvider::new();
        provider.expect_send().times(1).returning(|_, _| {
            Err(NotificationError::ProviderRejected {
                status: 400,
                body: "INVALID_ARGUMENT".to_string(),
            })
        });

        let dispatcher = DirectDispatcher::new(Arc::new(provider));
        let result = dispatcher.send(&request(Some("bad-token"))).await;
        assert!(matches!(
            result,
            Err(NotificationError::ProviderRejected { status: 400, .. })
        ));
    }

    #[test]
    fn test_request_deserialize_camel_case() {
        let request: DirectNotificationRequest =
            serde_json::from_str(r#"{"senderName":"Jana","message":"Ahoj","fcmToken":"T1"}"#)
                .unwrap();
        assert_eq!(request.sender_name.as_deref(), Some("Jana"));
        assert_eq!(request.fcm_token.as_deref(), Some("T1"));

        let empty: DirectNotificationRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.fcm_token.is_none());
    }
}
