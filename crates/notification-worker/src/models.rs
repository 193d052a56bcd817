//! 通知领域模型
//!
//! 包含存储侧的只读记录（聊天、用户资料）、推送载荷以及分发结果。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// 存储记录
// ---------------------------------------------------------------------------

/// 聊天记录
///
/// `participants` 为 `None` 表示记录存在但缺少参与者字段，
/// 与记录不存在（存储层返回 `None`）是两种不同情况。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatRecord {
    pub id: String,
    #[serde(default)]
    pub participants: Option<Vec<String>>,
}

impl ChatRecord {
    pub fn new(id: impl Into<String>, participants: Vec<String>) -> Self {
        Self {
            id: id.into(),
            participants: Some(participants),
        }
    }

    /// 缺少参与者字段的聊天记录
    pub fn without_participants(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            participants: None,
        }
    }
}

/// 用户资料
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[sqlx(rename = "id")]
    pub user_id: String,
    #[serde(default)]
    pub fcm_token: Option<String>,
    /// 未设置视为允许推送
    #[serde(default)]
    pub notifications_enabled: Option<bool>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            fcm_token: None,
            notifications_enabled: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.fcm_token = Some(token.into());
        self
    }

    pub fn with_notifications_enabled(mut self, enabled: bool) -> Self {
        self.notifications_enabled = Some(enabled);
        self
    }

    /// 有效的推送令牌，空字符串视为没有令牌
    pub fn delivery_token(&self) -> Option<&str> {
        self.fcm_token.as_deref().filter(|token| !token.is_empty())
    }

    /// 只有显式设置为 false 才视为关闭
    pub fn notifications_enabled(&self) -> bool {
        self.notifications_enabled != Some(false)
    }
}

// ---------------------------------------------------------------------------
// 推送载荷
// ---------------------------------------------------------------------------

/// Android 通知优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Max,
    High,
}

impl NotificationPriority {
    /// FCM HTTP v1 中 `notification_priority` 的取值
    pub fn as_fcm_str(&self) -> &'static str {
        match self {
            Self::Max => "PRIORITY_MAX",
            Self::High => "PRIORITY_HIGH",
        }
    }
}

/// Android 投递渠道提示
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidNotification {
    pub channel_id: String,
    pub priority: NotificationPriority,
    pub default_sound: bool,
    pub icon: String,
}

/// 推送载荷（不含目标令牌）
///
/// `data` 中的键是客户端契约的一部分，值一律为字符串。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub android: AndroidNotification,
    pub data: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// 分发结果
// ---------------------------------------------------------------------------

/// 单个接收者的分发状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    Sent,
    Skipped,
    Failed,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// 跳过原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    /// 用户没有推送令牌
    NoToken,
    /// 用户关闭了通知
    Disabled,
}

/// 单个接收者的分发结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub recipient_id: String,
    pub status: DispatchStatus,
    pub skip_reason: Option<SkipReason>,
    /// 推送服务返回的消息标识
    pub delivery_id: Option<String>,
    pub error: Option<String>,
}

impl DispatchOutcome {
    pub fn sent(recipient_id: impl Into<String>, delivery_id: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            status: DispatchStatus::Sent,
            skip_reason: None,
            delivery_id: Some(delivery_id.into()),
            error: None,
        }
    }

    pub fn skipped(recipient_id: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            status: DispatchStatus::Skipped,
            skip_reason: Some(reason),
            delivery_id: None,
            error: None,
        }
    }

    pub fn failed(recipient_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            status: DispatchStatus::Failed,
            skip_reason: None,
            delivery_id: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DispatchStatus::Sent
    }
}

/// 一次扇出的汇总结果
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutReport {
    pub outcomes: Vec<DispatchOutcome>,
    pub duration_ms: u64,
}

impl FanOutReport {
    pub fn new(outcomes: Vec<DispatchOutcome>, duration_ms: u64) -> Self {
        Self {
            outcomes,
            duration_ms,
        }
    }

    fn count(&self, status: DispatchStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn sent_count(&self) -> usize {
        self.count(DispatchStatus::Sent)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(DispatchStatus::Skipped)
    }

    pub fn failed_count(&self) -> usize {
        self.count(DispatchStatus::Failed)
    }

    /// 按接收者查找结果
    pub fn outcome_for(&self, recipient_id: &str) -> Option<&DispatchOutcome> {
        self.outcomes.iter().find(|o| o.recipient_id == recipient_id)
    }
}
