//! 聊天推送通知服务
//!
//! 消费聊天消息创建事件并向其他参与者扇出推送，同时提供直接推送 HTTP 接口。

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use chat_notification_worker::api::{self, AppState};
use chat_notification_worker::consumer::NotificationConsumer;
use chat_notification_worker::direct::DirectDispatcher;
use chat_notification_worker::dispatcher::FanOutDispatcher;
use chat_notification_worker::error::NotificationError;
use chat_notification_worker::idempotency::RedisDeliveryGuard;
use chat_notification_worker::pipeline::ChatNotificationPipeline;
use chat_notification_worker::resolver::RecipientResolver;
use chat_notification_worker::sender::{FcmPushProvider, LogPushProvider, PushProvider};
use chat_notification_worker::store::{ChatStore, MemoryChatStore, PgChatStore};
use chat_push_shared::cache::Cache;
use chat_push_shared::config::{AppConfig, PushProviderKind, StoreBackend};
use chat_push_shared::database::Database;
use chat_push_shared::observability;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "chat-notification-worker";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = AppConfig::load(SERVICE_NAME).unwrap_or_default();
    if config.service_name.is_empty() {
        config.service_name = SERVICE_NAME.to_string();
    }

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        store = ?config.store.backend,
        provider = ?config.push.provider,
        "Starting {}...",
        config.service_name
    );

    // 存储
    let mut database = None;
    let store: Arc<dyn ChatStore> = match config.store.backend {
        StoreBackend::Postgres => {
            let db = Database::connect(&config.database).await?;
            db.health_check().await?;
            let store = PgChatStore::new(db.pool().clone());
            store.check_schema().await?;
            database = Some(db);
            Arc::new(store)
        }
        StoreBackend::Memory => {
            warn!("使用内存存储，聊天与用户数据在进程内维护");
            Arc::new(MemoryChatStore::new())
        }
    };

    // 推送服务
    let provider: Arc<dyn PushProvider> = match config.push.provider {
        PushProviderKind::Fcm => Arc::new(FcmPushProvider::new(&config.push)?),
        PushProviderKind::Log => {
            if config.is_production() {
                error!("生产环境配置了模拟推送，通知不会真正发出");
            } else {
                warn!("使用模拟推送，通知不会真正发出");
            }
            Arc::new(LogPushProvider)
        }
    };

    // 流水线
    let dispatcher = FanOutDispatcher::new(store.clone(), provider.clone())
        .with_max_concurrency(config.dispatch.max_concurrency);
    let mut pipeline = ChatNotificationPipeline::new(RecipientResolver::new(store), dispatcher);

    if config.dispatch.dedup_enabled {
        let cache = Cache::new(&config.redis)?;
        if let Err(e) = cache.health_check().await {
            // 占位失败时放行，Redis 不可用不阻止启动
            warn!(error = %e, "Redis 暂不可用，重复投递保护将降级");
        }
        let ttl = Duration::from_secs(config.dispatch.dedup_ttl_seconds);
        pipeline = pipeline.with_guard(Arc::new(RedisDeliveryGuard::new(cache, ttl)));
        info!(ttl_seconds = ttl.as_secs(), "已启用重复投递保护");
    }

    let pipeline = Arc::new(pipeline);

    // 消费者
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = NotificationConsumer::new(&config.kafka, pipeline)?;
    let consumer_handle = tokio::spawn(consumer.run(shutdown_rx));

    // 直接推送接口
    let app = api::router(AppState {
        direct: Arc::new(DirectDispatcher::new(provider)),
    });

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    let result = supervise(server, consumer_handle, shutdown_tx).await;

    if let Some(db) = database {
        db.close().await;
    }

    info!("{} stopped", config.service_name);
    result
}

/// 同时运行 HTTP 服务与消息事件消费者
///
/// HTTP 服务正常停止后通知消费者退出并等待当前事件处理完成；
/// 消费者在收到关闭信号前退出时视为服务失效，停止 HTTP 服务并返回错误。
async fn supervise<S>(
    server: S,
    mut consumer: JoinHandle<Result<(), NotificationError>>,
    shutdown_tx: watch::Sender<bool>,
) -> anyhow::Result<()>
where
    S: IntoFuture<Output = std::io::Result<()>>,
{
    let server = server.into_future();
    tokio::pin!(server);

    tokio::select! {
        served = &mut server => {
            let _ = shutdown_tx.send(true);
            match consumer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "消息事件消费者异常退出"),
                Err(e) => error!(error = %e, "等待消费者退出失败"),
            }
            served?;
            Ok(())
        }
        joined = &mut consumer => {
            let reason = match joined {
                Ok(Ok(())) => "消息流已结束".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            error!(reason = %reason, "消息事件消费者提前退出，停止服务");
            anyhow::bail!("消息事件消费者提前退出: {reason}")
        }
    }
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_push_shared::error::ChatPushError;

    #[tokio::test]
    async fn test_consumer_exit_stops_service_with_error() {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let consumer = tokio::spawn(async { Ok::<(), NotificationError>(()) });

        let server = std::future::pending::<std::io::Result<()>>();
        let result = supervise(server, consumer, shutdown_tx).await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("消息流已结束"));
    }

    #[tokio::test]
    async fn test_consumer_error_is_reported() {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let consumer = tokio::spawn(async {
            Err(NotificationError::from(ChatPushError::Kafka(
                "订阅 topic 失败".to_string(),
            )))
        });

        let server = std::future::pending::<std::io::Result<()>>();
        let result = supervise(server, consumer, shutdown_tx).await;
        assert!(result.unwrap_err().to_string().contains("订阅 topic 失败"));
    }

    #[tokio::test]
    async fn test_server_stop_signals_consumer() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let consumer = tokio::spawn(async move {
            while !*shutdown_rx.borrow_and_update() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
            Ok::<(), NotificationError>(())
        });

        let server = async { Ok::<(), std::io::Error>(()) };
        let result = supervise(server, consumer, shutdown_tx).await;
        assert!(result.is_ok());
    }
}
