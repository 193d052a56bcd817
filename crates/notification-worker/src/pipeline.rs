//! 聊天消息通知流水线
//!
//! 消息创建事件的唯一入口：幂等占位 → 内容补齐 → 解析接收者 → 扇出分发。
//! `handle` 不返回错误，所有结果都体现在 `PipelineOutcome` 中。

use std::sync::Arc;

use chat_push_shared::events::MessageEvent;
use chat_push_shared::observability::metrics;
use tracing::{error, info, warn};

use crate::dispatcher::FanOutDispatcher;
use crate::error::NotificationError;
use crate::idempotency::DeliveryGuard;
use crate::models::FanOutReport;
use crate::resolver::RecipientResolver;
use crate::templates::ChatNotificationContext;

/// 一次事件处理的结果
#[derive(Debug)]
pub enum PipelineOutcome {
    /// 扇出已执行，包含每个接收者的结果
    Completed(FanOutReport),
    /// 没有需要通知的接收者
    NoRecipients,
    /// 该消息已经处理过
    Duplicate,
    /// 接收者解析失败，没有任何推送被发出
    Failed { reason: String },
}

impl PipelineOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::NoRecipients => "no_recipients",
            Self::Duplicate => "duplicate",
            Self::Failed { .. } => "failed",
        }
    }
}

pub struct ChatNotificationPipeline {
    resolver: RecipientResolver,
    dispatcher: FanOutDispatcher,
    guard: Option<Arc<dyn DeliveryGuard>>,
}

impl ChatNotificationPipeline {
    pub fn new(resolver: RecipientResolver, dispatcher: FanOutDispatcher) -> Self {
        Self {
            resolver,
            dispatcher,
            guard: None,
        }
    }

    pub fn with_guard(mut self, guard: Arc<dyn DeliveryGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// 处理一条消息创建事件
    pub async fn handle(&self, event: &MessageEvent) -> PipelineOutcome {
        let outcome = match self.process(event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    chat_id = %event.chat_id,
                    message_id = %event.message_id,
                    error = %e,
                    "聊天通知处理失败"
                );
                PipelineOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        metrics::record_event(outcome.as_str());
        outcome
    }

    async fn process(&self, event: &MessageEvent) -> Result<PipelineOutcome, NotificationError> {
        if !self.claim(event).await {
            info!(dedup_key = %event.dedup_key(), "消息已处理过，忽略重复投递");
            return Ok(PipelineOutcome::Duplicate);
        }

        let context = ChatNotificationContext::from_event(event);

        let recipients = match self.resolver.resolve(&event.chat_id, &event.sender_id).await {
            Ok(recipients) => recipients,
            Err(e) => {
                // 没有任何推送发出，释放占位让重新投递可以再次处理
                self.release(event).await;
                return Err(e);
            }
        };

        if recipients.is_empty() {
            info!(chat_id = %event.chat_id, "没有需要通知的接收者");
            return Ok(PipelineOutcome::NoRecipients);
        }

        let report = self.dispatcher.dispatch(&recipients, &context).await;
        Ok(PipelineOutcome::Completed(report))
    }

    /// 幂等占位，占位服务异常时放行
    async fn claim(&self, event: &MessageEvent) -> bool {
        let Some(guard) = &self.guard else {
            return true;
        };

        match guard.try_claim(&event.chat_id, &event.message_id).await {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(
                    chat_id = %event.chat_id,
                    message_id = %event.message_id,
                    error = %e,
                    "幂等检查失败，继续处理"
                );
                true
            }
        }
    }

    async fn release(&self, event: &MessageEvent) {
        let Some(guard) = &self.guard else {
            return;
        };

        if let Err(e) = guard.release(&event.chat_id, &event.message_id).await {
            warn!(
                chat_id = %event.chat_id,
                message_id = %event.message_id,
                error = %e,
                "释放幂等占位失败，重新投递将被视为重复"
            );
        }
    }
}
