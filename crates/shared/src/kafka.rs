//! Kafka 消费封装
//!
//! 把 rdkafka 的 `StreamConsumer` 包装成按条回调的消费循环，
//! 由 `watch` channel 控制退出，消息以拥有所有权的 `ConsumerMessage` 交给回调。

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::ChatPushError;

/// Kafka topic 名称
pub mod topics {
    /// 聊天消息创建事件，每条新消息投递一次（至少一次语义）
    pub const CHAT_MESSAGES_CREATED: &str = "chat.messages.created";
}

/// 一条已消费的 Kafka 消息
///
/// 从借用消息复制出所需字段，便于跨 await 传递。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// 分区键，上游使用 chat_id
    pub key: Option<String>,
    pub payload: Vec<u8>,
    /// 写入时间（毫秒）
    pub timestamp: Option<i64>,
}

impl ConsumerMessage {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg
                .key()
                .and_then(|k| std::str::from_utf8(k).ok())
                .map(str::to_string),
            payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            timestamp: msg.timestamp().to_millis(),
        }
    }

    /// 负载为空（tombstone 或上游写入了空消息）
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// 按 JSON 解析负载
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, ChatPushError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| ChatPushError::Kafka(format!("负载反序列化失败: {e}")))
    }
}

/// 消费循环退出时的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    pub handled: u64,
    pub receive_errors: u64,
}

pub struct KafkaConsumer {
    consumer: StreamConsumer,
    group_id: String,
}

impl KafkaConsumer {
    /// 创建消费者，`group_id_suffix` 追加在配置的消费组之后，如 "chat-push.notifications"
    pub fn new(config: &KafkaConfig, group_id_suffix: Option<&str>) -> Result<Self, ChatPushError> {
        let group_id = match group_id_suffix {
            Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| ChatPushError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id = %group_id, "Kafka 消费者已创建");
        Ok(Self { consumer, group_id })
    }

    pub fn subscribe(&self, topics: &[&str]) -> Result<(), ChatPushError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| ChatPushError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, group_id = %self.group_id, "已订阅 Kafka topics");
        Ok(())
    }

    /// 逐条消费直到关闭信号变为 true
    ///
    /// 消息按顺序交给 `handler`，上一条处理完才拉取下一条；
    /// 关闭信号到达时正在处理的消息会先完成。接收错误只记录日志。
    pub async fn run_until_shutdown<F, Fut>(
        self,
        mut shutdown: watch::Receiver<bool>,
        handler: F,
    ) -> ConsumeStats
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        use futures::StreamExt;

        let mut stats = ConsumeStats::default();
        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    // 发送端被丢弃同样视为关闭
                    if changed.is_err() || *shutdown.borrow() {
                        info!(group_id = %self.group_id, "收到关闭信号，停止消费");
                        break;
                    }
                }

                next = stream.next() => {
                    match next {
                        Some(Ok(borrowed)) => {
                            let msg = ConsumerMessage::from_borrowed(&borrowed);
                            debug!(
                                topic = %msg.topic,
                                partition = msg.partition,
                                offset = msg.offset,
                                "收到 Kafka 消息"
                            );
                            handler(msg).await;
                            stats.handled += 1;
                        }
                        Some(Err(e)) => {
                            stats.receive_errors += 1;
                            error!(error = %e, "接收 Kafka 消息出错");
                        }
                        None => {
                            warn!("Kafka 消息流意外结束");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            group_id = %self.group_id,
            handled = stats.handled,
            receive_errors = stats.receive_errors,
            "Kafka 消费循环已退出"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with_payload(payload: &[u8]) -> ConsumerMessage {
        ConsumerMessage {
            topic: topics::CHAT_MESSAGES_CREATED.to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload: payload.to_vec(),
            timestamp: None,
        }
    }

    #[test]
    fn test_deserialize_payload() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        #[serde(rename_all = "camelCase")]
        struct Event {
            chat_id: String,
            sender: String,
        }

        let msg = message_with_payload(br#"{"chatId":"c1","sender":"u1"}"#);

        let event: Event = msg.deserialize_payload().unwrap();
        assert_eq!(
            event,
            Event {
                chat_id: "c1".to_string(),
                sender: "u1".to_string(),
            }
        );
    }

    #[test]
    fn test_deserialize_payload_invalid_json() {
        let msg = message_with_payload(b"not json");

        let err = msg.deserialize_payload::<serde_json::Value>().unwrap_err();
        assert_eq!(err.code(), "KAFKA_ERROR");
    }

    #[test]
    fn test_is_empty() {
        assert!(message_with_payload(b"").is_empty());
        assert!(!message_with_payload(b"{}").is_empty());
    }

    #[tokio::test]
    async fn test_consumer_created_without_broker_connection() {
        // librdkafka 延迟建连，创建阶段不需要可用的 broker
        let consumer = KafkaConsumer::new(&KafkaConfig::default(), Some("notifications")).unwrap();
        assert_eq!(consumer.group_id, "chat-push.notifications");
    }

    #[tokio::test]
    #[ignore] // 需要 Kafka 连接
    async fn test_run_until_shutdown_stops_on_signal() {
        let consumer = KafkaConsumer::new(&KafkaConfig::default(), Some("test")).unwrap();
        consumer.subscribe(&[topics::CHAT_MESSAGES_CREATED]).unwrap();

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let stats = consumer.run_until_shutdown(rx, |_msg| async {}).await;
        assert_eq!(stats.receive_errors, 0);
    }
}
