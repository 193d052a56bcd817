//! 扇出分发
//!
//! 对每个接收者独立执行：读取用户资料 → 资格检查 → 发送推送。
//! 所有接收者并行处理，单个接收者的失败只记录为该接收者的 `Failed` 结果，
//! 不影响其他接收者，整个扇出也不会因此失败。

use std::sync::Arc;
use std::time::Instant;

use chat_push_shared::observability::metrics;
use futures::StreamExt;
use futures::future::join_all;
use futures::stream;
use tracing::{error, info, warn};

use crate::models::{DispatchOutcome, FanOutReport, NotificationPayload, SkipReason, UserProfile};
use crate::sender::{PushProvider, token_hint};
use crate::store::ChatStore;
use crate::templates::{ChatNotificationContext, NotificationTemplateEngine};

pub struct FanOutDispatcher {
    store: Arc<dyn ChatStore>,
    provider: Arc<dyn PushProvider>,
    /// 同时在途的发送数量上限，`None` 表示不限制
    max_concurrency: Option<usize>,
}

impl FanOutDispatcher {
    pub fn new(store: Arc<dyn ChatStore>, provider: Arc<dyn PushProvider>) -> Self {
        Self {
            store,
            provider,
            max_concurrency: None,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: Option<usize>) -> Self {
        self.max_concurrency = max_concurrency.map(|limit| limit.max(1));
        self
    }

    /// 向所有接收者扇出推送，等待全部完成后返回汇总
    pub async fn dispatch(
        &self,
        recipients: &[String],
        context: &ChatNotificationContext,
    ) -> FanOutReport {
        let started = Instant::now();
        let payload = NotificationTemplateEngine::chat_payload(context);

        let tasks = recipients
            .iter()
            .map(|recipient_id| self.dispatch_one(recipient_id, &payload, context))
            .collect::<Vec<_>>();

        let outcomes: Vec<DispatchOutcome> = match self.max_concurrency {
            Some(limit) => stream::iter(tasks).buffer_unordered(limit).collect().await,
            None => join_all(tasks).await,
        };

        let elapsed = started.elapsed();
        metrics::record_fanout_duration(elapsed.as_secs_f64());

        let report = FanOutReport::new(outcomes, elapsed.as_millis() as u64);

        info!(
            chat_id = %context.chat_id,
            message_id = %context.message_id,
            recipients = recipients.len(),
            sent = report.sent_count(),
            skipped = report.skipped_count(),
            failed = report.failed_count(),
            duration_ms = report.duration_ms,
            "聊天通知扇出完成"
        );

        report
    }

    /// 处理单个接收者，任何错误都转换为 `Failed` 结果
    pub async fn dispatch_one(
        &self,
        recipient_id: &str,
        payload: &NotificationPayload,
        context: &ChatNotificationContext,
    ) -> DispatchOutcome {
        let outcome = self.try_dispatch(recipient_id, payload, context).await;
        metrics::record_dispatch(outcome.status.as_str());
        outcome
    }

    async fn try_dispatch(
        &self,
        recipient_id: &str,
        payload: &NotificationPayload,
        context: &ChatNotificationContext,
    ) -> DispatchOutcome {
        let profile = match self.store.get_user(recipient_id).await {
            Ok(profile) => profile,
            Err(e) => {
                error!(
                    chat_id = %context.chat_id,
                    recipient_id,
                    error = %e,
                    code = e.code(),
                    retryable = e.is_retryable(),
                    "读取用户资料失败"
                );
                return DispatchOutcome::failed(recipient_id, e.to_string());
            }
        };

        // 资格检查：先看令牌，再看偏好；没有用户资料等同于没有令牌
        let Some(token) = profile.as_ref().and_then(UserProfile::delivery_token) else {
            info!(chat_id = %context.chat_id, recipient_id, "用户没有推送令牌，跳过");
            return DispatchOutcome::skipped(recipient_id, SkipReason::NoToken);
        };

        if profile.as_ref().is_some_and(|p| !p.notifications_enabled()) {
            info!(chat_id = %context.chat_id, recipient_id, "用户已关闭通知，跳过");
            return DispatchOutcome::skipped(recipient_id, SkipReason::Disabled);
        }

        match self.provider.send(token, payload).await {
            Ok(delivery_id) => {
                info!(
                    chat_id = %context.chat_id,
                    recipient_id,
                    delivery_id = %delivery_id,
                    "推送通知发送成功"
                );
                DispatchOutcome::sent(recipient_id, delivery_id)
            }
            Err(e) => {
                warn!(
                    chat_id = %context.chat_id,
                    recipient_id,
                    token = %token_hint(token),
                    provider = self.provider.name(),
                    error = %e,
                    "推送通知发送失败"
                );
                DispatchOutcome::failed(recipient_id, e.to_string())
            }
        }
    }
}
