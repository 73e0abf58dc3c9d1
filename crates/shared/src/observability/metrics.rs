//! Prometheus 指标
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现，指标通过独立端口的
//! `/metrics` 暴露。未安装 recorder 时各记录函数为空操作。

use std::net::SocketAddr;
use std::sync::OnceLock;

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::kafka::Disposition;
use crate::models::{NotificationStatus, OrderStatus};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 指标 HTTP 服务句柄
pub struct MetricsHandle {
    server: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    pub fn shutdown(self) {
        self.server.abort();
    }
}

pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    describe_metrics();
    ::metrics::counter!("service_starts_total", "service" => service_name.to_string())
        .increment(1);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server })
}

fn describe_metrics() {
    ::metrics::describe_counter!(
        "kafka_messages_consumed_total",
        "Consumed messages by topic and disposition"
    );
    ::metrics::describe_counter!(
        "kafka_messages_published_total",
        "Published events by topic and result"
    );
    ::metrics::describe_counter!("payment_attempts_total", "Simulated payment outcomes");
    ::metrics::describe_counter!(
        "order_transitions_total",
        "Applied order status transitions"
    );
    ::metrics::describe_counter!(
        "order_transitions_skipped_total",
        "Transitions skipped because the order already moved on"
    );
    ::metrics::describe_counter!("orders_expired_total", "Orders reclaimed by the watchdog");
    ::metrics::describe_histogram!(
        "expiration_sweep_duration_seconds",
        "Watchdog sweep duration in seconds"
    );
    ::metrics::describe_counter!(
        "notifications_recorded_total",
        "Notification audit rows written"
    );
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "指标服务已监听");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "指标服务异常退出");
        }
    }))
}

pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

fn disposition_label(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::Commit => "commit",
        Disposition::Redeliver => "redeliver",
        Disposition::Stop => "stop",
    }
}

#[inline]
pub fn record_consumed(topic: &str, disposition: Disposition) {
    ::metrics::counter!(
        "kafka_messages_consumed_total",
        "topic" => topic.to_string(),
        "disposition" => disposition_label(disposition)
    )
    .increment(1);
}

#[inline]
pub fn record_published(topic: &str, success: bool) {
    ::metrics::counter!(
        "kafka_messages_published_total",
        "topic" => topic.to_string(),
        "result" => if success { "ok" } else { "error" }
    )
    .increment(1);
}

#[inline]
pub fn record_payment(success: bool) {
    ::metrics::counter!(
        "payment_attempts_total",
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// 记录一次已生效的状态流转
#[inline]
pub fn record_transition(to: OrderStatus) {
    ::metrics::counter!("order_transitions_total", "to" => to.to_string()).increment(1);
}

/// 守卫条件不满足、流转被跳过
#[inline]
pub fn record_transition_skipped(to: OrderStatus) {
    ::metrics::counter!("order_transitions_skipped_total", "to" => to.to_string()).increment(1);
}

#[inline]
pub fn record_expiration_sweep(expired: usize, duration_secs: f64) {
    ::metrics::counter!("orders_expired_total").increment(expired as u64);
    ::metrics::histogram!("expiration_sweep_duration_seconds").record(duration_secs);
}

#[inline]
pub fn record_notification(status: NotificationStatus) {
    let label = match status {
        NotificationStatus::OrderCompleted => "order_completed",
        NotificationStatus::OrderExpired => "order_expired",
    };
    ::metrics::counter!("notifications_recorded_total", "status" => label).increment(1);
}
