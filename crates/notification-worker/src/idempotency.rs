//! 重复投递保护
//!
//! 消息事件按至少一次语义投递，同一条消息可能触发多次。启用后，
//! 以 `(chat_id, message_id)` 为键做一次性占位，占位失败说明该消息已经处理过。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chat_push_shared::cache::Cache;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::error::NotificationError;

/// Redis 中幂等标记的键前缀
pub const DELIVERY_KEY_PREFIX: &str = "chat-push:delivered:";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryGuard: Send + Sync {
    /// 尝试占位，返回 false 表示该消息已被处理
    async fn try_claim(&self, chat_id: &str, message_id: &str) -> Result<bool, NotificationError>;

    /// 释放占位，处理失败后让重新投递的同一消息可以再次被处理
    async fn release(&self, chat_id: &str, message_id: &str) -> Result<(), NotificationError>;
}

fn delivery_key(chat_id: &str, message_id: &str) -> String {
    format!("{DELIVERY_KEY_PREFIX}{chat_id}:{message_id}")
}

/// 基于 Redis SET NX EX 的幂等保护，适用于多实例部署
pub struct RedisDeliveryGuard {
    cache: Cache,
    ttl: Duration,
}

impl RedisDeliveryGuard {
    pub fn new(cache: Cache, ttl: Duration) -> Self {
        Self { cache, ttl }
    }
}

#[async_trait]
impl DeliveryGuard for RedisDeliveryGuard {
    async fn try_claim(&self, chat_id: &str, message_id: &str) -> Result<bool, NotificationError> {
        let key = delivery_key(chat_id, message_id);
        let claimed = self.cache.set_nx(&key, "1", self.ttl).await?;
        debug!(key = %key, claimed, "幂等占位");
        Ok(claimed)
    }

    async fn release(&self, chat_id: &str, message_id: &str) -> Result<(), NotificationError> {
        let key = delivery_key(chat_id, message_id);
        self.cache.delete(&key).await?;
        debug!(key = %key, "幂等占位已释放");
        Ok(())
    }
}

/// 进程内幂等保护
///
/// 只在单实例内生效，每次占位前清理已过期的记录。
#[derive(Clone)]
pub struct MemoryDeliveryGuard {
    claims: Arc<DashMap<String, Instant>>,
    ttl: Duration,
}

impl MemoryDeliveryGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            claims: Arc::new(DashMap::new()),
            ttl,
        }
    }

    fn purge_expired(&self) -> usize {
        let before = self.claims.len();
        let ttl = self.ttl;
        self.claims.retain(|_, claimed_at| claimed_at.elapsed() < ttl);
        before - self.claims.len()
    }
}

#[async_trait]
impl DeliveryGuard for MemoryDeliveryGuard {
    async fn try_claim(&self, chat_id: &str, message_id: &str) -> Result<bool, NotificationError> {
        let purged = self.purge_expired();
        if purged > 0 {
            debug!(purged, "已清理过期的幂等占位");
        }

        let key = delivery_key(chat_id, message_id);
        let claimed = match self.claims.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(Instant::now());
                true
            }
            Entry::Occupied(mut entry) => {
                if entry.get().elapsed() >= self.ttl {
                    entry.insert(Instant::now());
                    true
                } else {
                    false
                }
            }
        };
        Ok(claimed)
    }

    async fn release(&self, chat_id: &str, message_id: &str) -> Result<(), NotificationError> {
        self.claims.remove(&delivery_key(chat_id, message_id));
        Ok(())
    }
}
