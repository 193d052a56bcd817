//! 消息事件消费者
//!
//! 从 Kafka 消费聊天消息创建事件并交给通知流水线处理。
//! 无法解析的消息记录日志后跳过，不会中断消费循环。

use std::sync::Arc;

use chat_push_shared::config::KafkaConfig;
use chat_push_shared::events::MessageEvent;
use chat_push_shared::kafka::{ConsumerMessage, KafkaConsumer, topics};
use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::NotificationError;
use crate::pipeline::{ChatNotificationPipeline, PipelineOutcome};

/// 消费组后缀，与同一服务内的其他消费逻辑隔离
const CONSUMER_GROUP_SUFFIX: &str = "notifications";

pub struct NotificationConsumer {
    consumer: KafkaConsumer,
    pipeline: Arc<ChatNotificationPipeline>,
}

impl NotificationConsumer {
    pub fn new(
        config: &KafkaConfig,
        pipeline: Arc<ChatNotificationPipeline>,
    ) -> Result<Self, NotificationError> {
        let consumer = KafkaConsumer::new(config, Some(CONSUMER_GROUP_SUFFIX))?;
        Ok(Self { consumer, pipeline })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), NotificationError> {
        self.consumer.subscribe(&[topics::CHAT_MESSAGES_CREATED])?;

        info!(topic = topics::CHAT_MESSAGES_CREATED, "消息事件消费者已启动");

        let pipeline = self.pipeline;

        let stats = self
            .consumer
            .run_until_shutdown(shutdown, |msg| {
                let pipeline = &pipeline;
                async move {
                    handle_message(pipeline, &msg).await;
                }
            })
            .await;

        info!(handled = stats.handled, "消息事件消费者已停止");
        Ok(())
    }
}

/// 解析事件负载
pub fn decode_event(msg: &ConsumerMessage) -> Result<MessageEvent, NotificationError> {
    if msg.is_empty() {
        return Err(NotificationError::DeserializationFailed(
            "消息负载为空".to_string(),
        ));
    }

    msg.deserialize_payload()
        .map_err(|e| NotificationError::DeserializationFailed(e.to_string()))
}

/// 处理单条 Kafka 消息，无法解析时返回 `None`
///
/// 拆分为独立函数，便于在测试中直接调用而无需构造完整的 Consumer。
pub async fn handle_message(
    pipeline: &ChatNotificationPipeline,
    msg: &ConsumerMessage,
) -> Option<PipelineOutcome> {
    let event = match decode_event(msg) {
        Ok(event) => event,
        Err(e) => {
            warn!(
                topic = %msg.topic,
                key = ?msg.key,
                partition = msg.partition,
                offset = msg.offset,
                error = %e,
                "没有可用的消息数据，跳过"
            );
            return None;
        }
    };

    // 事件写入 Kafka 到被消费之间的延迟
    let lag_ms = msg
        .timestamp
        .map(|ts| Utc::now().timestamp_millis().saturating_sub(ts));

    info!(
        chat_id = %event.chat_id,
        message_id = %event.message_id,
        sender_id = %event.sender_id,
        lag_ms = ?lag_ms,
        "收到消息创建事件"
    );

    let outcome = pipeline.handle(&event).await;

    info!(
        chat_id = %event.chat_id,
        message_id = %event.message_id,
        outcome = outcome.as_str(),
        "消息事件处理完成"
    );

    Some(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::FanOutDispatcher;
    use crate::models::{ChatRecord, UserProfile};
    use crate::resolver::RecipientResolver;
    use crate::sender::MockPushProvider;
    use crate::store::MemoryChatStore;

    fn message(payload: &[u8]) -> ConsumerMessage {
        ConsumerMessage {
            topic: topics::CHAT_MESSAGES_CREATED.to_string(),
            partition: 0,
            offset: 7,
            key: Some("c1".to_string()),
            payload: payload.to_vec(),
            timestamp: None,
        }
    }

    fn pipeline(provider: MockPushProvider) -> ChatNotificationPipeline {
        let store = Arc::new(MemoryChatStore::new());
        store.insert_chat(ChatRecord::new(
            "c1",
            vec!["u1".to_string(), "u2".to_string()],
        ));
        store.insert_user(UserProfile::new("u2").with_token("T2"));

        ChatNotificationPipeline::new(
            RecipientResolver::new(store.clone()),
            FanOutDispatcher::new(store, Arc::new(provider)),
        )
    }

    #[test]
    fn test_decode_event() {
        let msg = message(
            br#"{"chatId":"c1","messageId":"m1","sender":"u1","senderName":"Jana","text":"Ahoj"}"#,
        );
        let event = decode_event(&msg).unwrap();
        assert_eq!(event.chat_id, "c1");
        assert_eq!(event.sender_id, "u1");
        assert_eq!(event.sender_name.as_deref(), Some("Jana"));
    }

    #[test]
    fn test_decode_empty_and_invalid_payload() {
        assert!(matches!(
            decode_event(&message(b"")),
            Err(NotificationError::DeserializationFailed(_))
        ));
        assert!(decode_event(&message(b"not valid json")).is_err());
        // 缺少必填字段
        assert!(decode_event(&message(br#"{"chatId":"c1"}"#)).is_err());
    }

    #[tokio::test]
    async fn test_handle_message_skips_undecodable_payload() {
        let mut provider = MockPushProvider::new();
        provider.expect_send().never();

        let pipeline = pipeline(provider);
        assert!(handle_message(&pipeline, &message(b"")).await.is_none());
        assert!(handle_message(&pipeline, &message(b"{")).await.is_none());
    }

    #[tokio::test]
    async fn test_handle_message_runs_pipeline() {
        let mut provider = MockPushProvider::new();
        provider
            .expect_send()
            .withf(|token, _| token == "T2")
            .times(1)
            .returning(|_, _| Ok("msg-2".to_string()));

        let pipeline = pipeline(provider);
        let mut msg = message(br#"{"chatId":"c1","messageId":"m1","sender":"u1"}"#);
        msg.timestamp = Some(Utc::now().timestamp_millis());

        let outcome = handle_message(&pipeline, &msg).await;
        match outcome {
            Some(PipelineOutcome::Completed(report)) => assert_eq!(report.sent_count(), 1),
            other => panic!("expected completed, got {other:?}"),
        }
    }
}
