//! 通知模板
//!
//! 负责两件事：
//! 1. 把事件里的可选字段统一补齐为有效通知内容（缺省发送者名称、空正文）；
//! 2. 按固定策略生成推送载荷。
//!
//! 当前策略：标题为「<发送者> Vám posílá zprávu」，聊天触发的正文为固定的
//! 点击提示语，直接推送的正文为调用方提供的消息；Android 渠道固定为
//! `chat_messages`，最高优先级，默认提示音。

use std::collections::BTreeMap;

use chat_push_shared::events::MessageEvent;

use crate::models::{AndroidNotification, NotificationPayload, NotificationPriority};

/// 缺少发送者名称时使用的占位
pub const UNKNOWN_SENDER: &str = "Neznámý uživatel";
/// 聊天触发通知的固定正文
pub const CHAT_CALL_TO_ACTION: &str = "Klikněte pro zobrazení zprávy";
pub const CHAT_CHANNEL_ID: &str = "chat_messages";
pub const NOTIFICATION_ICON: &str = "@drawable/ic_notification";
/// 客户端用于路由点击事件的固定值
pub const CLICK_ACTION: &str = "FLUTTER_NOTIFICATION_CLICK";
pub const CHAT_PRIORITY: NotificationPriority = NotificationPriority::Max;

/// 数据块键名，属于客户端契约，不可随意修改
pub mod data_keys {
    pub const CHAT_ID: &str = "chatId";
    pub const MESSAGE_ID: &str = "messageId";
    pub const CLICK_ACTION: &str = "click_action";
    pub const SENDER_NAME: &str = "senderName";
    pub const SENDER_EMAIL: &str = "senderEmail";
}

/// 补齐默认值后的通知内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContent {
    pub sender_name: String,
    pub message_text: String,
    pub sender_contact: Option<String>,
}

impl NotificationContent {
    /// 统一处理可选字段：名称缺失或为空 → 占位名称，正文缺失 → 空字符串
    pub fn resolve(
        sender_name: Option<&str>,
        message_text: Option<&str>,
        sender_contact: Option<&str>,
    ) -> Self {
        Self {
            sender_name: sender_name
                .filter(|name| !name.is_empty())
                .unwrap_or(UNKNOWN_SENDER)
                .to_string(),
            message_text: message_text.unwrap_or_default().to_string(),
            sender_contact: sender_contact
                .filter(|contact| !contact.is_empty())
                .map(str::to_string),
        }
    }

    pub fn from_event(event: &MessageEvent) -> Self {
        Self::resolve(
            event.sender_name.as_deref(),
            event.text.as_deref(),
            event.sender_email.as_deref(),
        )
    }
}

/// 聊天触发通知的上下文：内容 + 所属聊天与消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatNotificationContext {
    pub chat_id: String,
    pub message_id: String,
    pub content: NotificationContent,
}

impl ChatNotificationContext {
    pub fn from_event(event: &MessageEvent) -> Self {
        Self {
            chat_id: event.chat_id.clone(),
            message_id: event.message_id.clone(),
            content: NotificationContent::from_event(event),
        }
    }
}

/// 通知模板引擎
///
/// 模板是硬编码的，所有接收者共享同一份渲染结果。
pub struct NotificationTemplateEngine;

impl NotificationTemplateEngine {
    pub fn render_title(sender_name: &str) -> String {
        format!("{sender_name} Vám posílá zprávu")
    }

    /// 聊天消息触发的推送载荷
    pub fn chat_payload(context: &ChatNotificationContext) -> NotificationPayload {
        let content = &context.content;

        let mut data = BTreeMap::new();
        data.insert(data_keys::CHAT_ID.to_string(), context.chat_id.clone());
        data.insert(data_keys::MESSAGE_ID.to_string(), context.message_id.clone());
        data.insert(data_keys::CLICK_ACTION.to_string(), CLICK_ACTION.to_string());
        data.insert(
            data_keys::SENDER_NAME.to_string(),
            content.sender_name.clone(),
        );
        if let Some(contact) = &content.sender_contact {
            data.insert(data_keys::SENDER_EMAIL.to_string(), contact.clone());
        }

        NotificationPayload {
            title: Self::render_title(&content.sender_name),
            body: CHAT_CALL_TO_ACTION.to_string(),
            android: chat_channel(),
            data,
        }
    }

    /// 直接推送的载荷，正文为调用方提供的消息
    pub fn direct_payload(content: &NotificationContent) -> NotificationPayload {
        let mut data = BTreeMap::new();
        data.insert(
            data_keys::SENDER_NAME.to_string(),
            content.sender_name.clone(),
        );
        data.insert(data_keys::CLICK_ACTION.to_string(), CLICK_ACTION.to_string());

        NotificationPayload {
            title: Self::render_title(&content.sender_name),
            body: content.message_text.clone(),
            android: chat_channel(),
            data,
        }
    }
}

fn chat_channel() -> AndroidNotification {
    AndroidNotification {
        channel_id: CHAT_CHANNEL_ID.to_string(),
        priority: CHAT_PRIORITY,
        default_sound: true,
        icon: NOTIFICATION_ICON.to_string(),
    }
}
