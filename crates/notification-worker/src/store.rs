//! 聊天与用户记录存储
//!
//! 通知服务对存储只读：按 ID 读取聊天记录和用户资料。
//! 存储层必须区分「记录不存在」(`Ok(None)`) 与「记录存在但字段缺失」。

use async_trait::async_trait;
use chat_push_shared::error::{ChatPushError, Result};
use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::Arc;

use crate::models::{ChatRecord, UserProfile};

/// 存储读取接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>>;
    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>>;
}

// ---------------------------------------------------------------------------
// 内存存储
// ---------------------------------------------------------------------------

/// 基于 DashMap 的内存存储
///
/// 适用于本地开发与测试，克隆后共享同一份数据。
#[derive(Debug, Clone, Default)]
pub struct MemoryChatStore {
    chats: Arc<DashMap<String, ChatRecord>>,
    users: Arc<DashMap<String, UserProfile>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或覆盖聊天记录
    pub fn insert_chat(&self, chat: ChatRecord) {
        self.chats.insert(chat.id.clone(), chat);
    }

    /// 插入或覆盖用户资料
    pub fn insert_user(&self, user: UserProfile) {
        self.users.insert(user.user_id.clone(), user);
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>> {
        Ok(self.chats.get(chat_id).map(|v| v.clone()))
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self.users.get(user_id).map(|v| v.clone()))
    }
}

// ---------------------------------------------------------------------------
// PostgreSQL 存储
// ---------------------------------------------------------------------------

/// PostgreSQL 存储
///
/// 表结构：
/// - `chats(id TEXT PRIMARY KEY, participants TEXT[] NULL)`
/// - `users(id TEXT PRIMARY KEY, fcm_token TEXT NULL, notifications_enabled BOOLEAN NULL)`
pub struct PgChatStore {
    pool: PgPool,
}

/// 读取路径依赖的数据表
const REQUIRED_TABLES: [&str; 2] = ["chats", "users"];

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 确认依赖的数据表存在，启动时调用
    pub async fn check_schema(&self) -> Result<()> {
        let mut missing = Vec::new();
        for table in REQUIRED_TABLES {
            let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
                .bind(table)
                .fetch_one(&self.pool)
                .await?;
            if !exists {
                missing.push(table);
            }
        }

        match missing_tables_error(&missing) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn missing_tables_error(missing: &[&str]) -> Option<ChatPushError> {
    if missing.is_empty() {
        return None;
    }
    Some(ChatPushError::Internal(format!("缺少数据表: {}", missing.join(", "))))
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>> {
        let chat = sqlx::query_as::<_, ChatRecord>(
            r#"
            SELECT id, participants
            FROM chats
            WHERE id = $1
            "#,
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(chat)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let user = sqlx::query_as::<_, UserProfile>(
            r#"
            SELECT id, fcm_token, notifications_enabled
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_distinguishes_missing_and_empty() {
        let store = MemoryChatStore::new();
        store.insert_chat(ChatRecord::without_participants("c-empty"));

        assert!(store.get_chat("c-missing").await.unwrap().is_none());

        let chat = store.get_chat("c-empty").await.unwrap().unwrap();
        assert!(chat.participants.is_none());
    }

    #[tokio::test]
    async fn test_memory_store_overwrite_and_clone_share_data() {
        let store = MemoryChatStore::new();
        let shared = store.clone();

        store.insert_user(UserProfile::new("u1"));
        shared.insert_user(UserProfile::new("u1").with_token("T1"));

        let user = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.delivery_token(), Some("T1"));

        shared.insert_chat(ChatRecord::new("c1", vec!["u1".to_string()]));
        let chat = store.get_chat("c1").await.unwrap().unwrap();
        assert_eq!(chat.participants, Some(vec!["u1".to_string()]));
    }

    #[test]
    fn test_missing_tables_error() {
        assert!(missing_tables_error(&[]).is_none());

        let err = missing_tables_error(&["chats", "users"]).unwrap();
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(err.to_string(), "内部错误: 缺少数据表: chats, users");
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_pg_store_schema_present() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.unwrap();
        tokio_test::assert_ok!(PgChatStore::new(pool).check_schema().await);
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_pg_store_missing_records() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.unwrap();
        let store = PgChatStore::new(pool);

        assert!(store.get_chat("no-such-chat").await.unwrap().is_none());
        assert!(store.get_user("no-such-user").await.unwrap().is_none());
    }
}
