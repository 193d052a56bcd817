//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册业务指标描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "chat_push_events_total",
        "Total number of chat message events handled, by pipeline outcome"
    );
    metrics::describe_counter!(
        "chat_push_dispatch_total",
        "Total number of per-recipient dispatch outcomes, by status"
    );
    metrics::describe_histogram!(
        "chat_push_fanout_duration_seconds",
        "Duration of one chat fan-out in seconds"
    );
    metrics::describe_counter!(
        "chat_push_direct_total",
        "Total number of direct notification requests, by status"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录一次事件处理结果（completed / no_recipients / duplicate / failed）
#[inline]
pub fn record_event(outcome: &'static str) {
    metrics::counter!("chat_push_events_total", "outcome" => outcome).increment(1);
}

/// 记录单个接收者的分发结果（sent / skipped / failed）
#[inline]
pub fn record_dispatch(status: &'static str) {
    metrics::counter!("chat_push_dispatch_total", "status" => status).increment(1);
}

/// 记录一次扇出耗时
#[inline]
pub fn record_fanout_duration(duration_secs: f64) {
    metrics::histogram!("chat_push_fanout_duration_seconds").record(duration_secs);
}

/// 记录直接推送请求结果
#[inline]
pub fn record_direct(status: &'static str) {
    metrics::counter!("chat_push_direct_total", "status" => status).increment(1);
}
