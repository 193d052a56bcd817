//! 事件模型
//!
//! 定义聊天消息创建事件的统一结构。事件由上游（消息写入方）在消息落库后
//! 投递到 Kafka，字段命名与客户端写入的消息文档保持一致（camelCase）。

use serde::{Deserialize, Serialize};

/// 聊天消息创建事件
///
/// 每条新消息产生一次，通知服务只读取、不修改。
/// 可选字段在生成通知内容时统一补默认值，这里保持原样。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    /// 所属聊天 ID
    pub chat_id: String,
    /// 消息 ID
    pub message_id: String,
    /// 发送者用户 ID
    #[serde(rename = "sender")]
    pub sender_id: String,
    /// 发送者显示名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// 消息正文
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// 发送者联系方式（邮箱）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_email: Option<String>,
}

impl MessageEvent {
    pub fn new(
        chat_id: impl Into<String>,
        message_id: impl Into<String>,
        sender_id: impl Into<String>,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            message_id: message_id.into(),
            sender_id: sender_id.into(),
            sender_name: None,
            text: None,
            sender_email: None,
        }
    }

    pub fn with_sender_name(mut self, sender_name: impl Into<String>) -> Self {
        self.sender_name = Some(sender_name.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_sender_email(mut self, sender_email: impl Into<String>) -> Self {
        self.sender_email = Some(sender_email.into());
        self
    }

    /// 幂等键，同一条消息的重复投递得到相同的键
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.chat_id, self.message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_event() {
        let json = r#"{
            "chatId": "c1",
            "messageId": "m1",
            "sender": "u1",
            "senderName": "Jana",
            "text": "Ahoj",
            "senderEmail": "jana@example.com"
        }"#;

        let event: MessageEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.chat_id, "c1");
        assert_eq!(event.message_id, "m1");
        assert_eq!(event.sender_id, "u1");
        assert_eq!(event.sender_name.as_deref(), Some("Jana"));
        assert_eq!(event.text.as_deref(), Some("Ahoj"));
        assert_eq!(event.sender_email.as_deref(), Some("jana@example.com"));
    }

    #[test]
    fn test_deserialize_minimal_event() {
        let json = r#"{"chatId":"c1","messageId":"m1","sender":"u1"}"#;

        let event: MessageEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, MessageEvent::new("c1", "m1", "u1"));
    }

    #[test]
    fn test_missing_sender_rejected() {
        let json = r#"{"chatId":"c1","messageId":"m1"}"#;
        assert!(serde_json::from_str::<MessageEvent>(json).is_err());
    }

    #[test]
    fn test_serialize_skips_absent_fields() {
        let event = MessageEvent::new("c1", "m1", "u1").with_text("Ahoj");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["sender"], "u1");
        assert_eq!(value["text"], "Ahoj");
        assert!(value.get("senderName").is_none());
        assert!(value.get("senderEmail").is_none());
    }

    #[test]
    fn test_dedup_key() {
        let event = MessageEvent::new("c1", "m1", "u1");
        assert_eq!(event.dedup_key(), "c1:m1");
    }
}
