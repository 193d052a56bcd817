//! 聊天推送通知服务
//!
//! 从 Kafka 消费新消息事件，解析聊天参与者（排除发送者），
//! 对每个接收者独立检查推送资格后并行发送推送通知。
//! 单个接收者失败不影响其他接收者，也不会让整批处理失败。
//! 另提供一个同步的直接推送接口，失败时会明确返回错误。

pub mod api;
pub mod consumer;
pub mod direct;
pub mod dispatcher;
pub mod error;
pub mod idempotency;
pub mod models;
pub mod pipeline;
pub mod resolver;
pub mod sender;
pub mod store;
pub mod templates;
