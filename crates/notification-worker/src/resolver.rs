//! 接收者解析
//!
//! 根据聊天参与者列表计算一条消息应通知的用户：参与者减去发送者。

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::NotificationError;
use crate::store::ChatStore;

pub struct RecipientResolver {
    store: Arc<dyn ChatStore>,
}

impl RecipientResolver {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// 解析接收者列表
    ///
    /// - 聊天不存在或缺少参与者字段 → 空列表（记录日志，不视为错误）
    /// - 发送者的每一次出现都会被移除，其余参与者保持原有顺序，重复项不去重
    /// - 存储读取失败向上传播
    pub async fn resolve(
        &self,
        chat_id: &str,
        sender_id: &str,
    ) -> Result<Vec<String>, NotificationError> {
        let Some(chat) = self.store.get_chat(chat_id).await? else {
            warn!(chat_id, "聊天记录不存在，跳过通知");
            return Ok(Vec::new());
        };

        let Some(participants) = chat.participants else {
            warn!(chat_id, "聊天记录缺少参与者字段，跳过通知");
            return Ok(Vec::new());
        };

        let recipients: Vec<String> = participants
            .into_iter()
            .filter(|participant| participant != sender_id)
            .collect();

        debug!(chat_id, sender_id, count = recipients.len(), "接收者解析完成");

        Ok(recipients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatRecord;
    use crate::store::{MemoryChatStore, MockChatStore};
    use chat_push_shared::error::ChatPushError;

    fn resolver_with(chats: Vec<ChatRecord>) -> RecipientResolver {
        let store = MemoryChatStore::new();
        for chat in chats {
            store.insert_chat(chat);
        }
        RecipientResolver::new(Arc::new(store))
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_excludes_sender_and_keeps_order() {
        let resolver = resolver_with(vec![ChatRecord::new("c1", ids(&["u1", "u2", "u3"]))]);

        let recipients = resolver.resolve("c1", "u1").await.unwrap();
        assert_eq!(recipients, ids(&["u2", "u3"]));
    }

    #[tokio::test]
    async fn test_sender_not_participant() {
        let resolver = resolver_with(vec![ChatRecord::new("c1", ids(&["u2", "u3"]))]);

        let recipients = resolver.resolve("c1", "u9").await.unwrap();
        assert_eq!(recipients, ids(&["u2", "u3"]));
    }

    #[tokio::test]
    async fn test_removes_every_sender_occurrence_keeps_other_duplicates() {
        let resolver = resolver_with(vec![ChatRecord::new(
            "c1",
            ids(&["u1", "u2", "u1", "u2", "u3"]),
        )]);

        let recipients = resolver.resolve("c1", "u1").await.unwrap();
        assert_eq!(recipients, ids(&["u2", "u2", "u3"]));
    }

    #[tokio::test]
    async fn test_only_sender_yields_empty() {
        let resolver = resolver_with(vec![ChatRecord::new("c1", ids(&["u1"]))]);
        assert!(resolver.resolve("c1", "u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_chat_yields_empty() {
        let resolver = resolver_with(vec![]);
        assert!(resolver.resolve("c-missing", "u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_participants_yields_empty() {
        let resolver = resolver_with(vec![ChatRecord::without_participants("c1")]);
        assert!(resolver.resolve("c1", "u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut store = MockChatStore::new();
        store
            .expect_get_chat()
            .withf(|chat_id| chat_id == "c1")
            .times(1)
            .returning(|_| Err(ChatPushError::Internal("connection reset".to_string())));

        let resolver = RecipientResolver::new(Arc::new(store));
        let result = resolver.resolve("c1", "u1").await;
        tokio_test::assert_err!(result);
    }
}
