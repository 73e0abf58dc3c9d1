//! 订单履约服务
//!
//! 在同一进程中启动订单生命周期处理器、通知落库消费者与过期巡检，
//! 共享订单库连接池和 Kafka 生产者，收到关闭信号后统一退出。

use std::sync::Arc;
use std::time::Duration;

use expiration_watchdog::{ExpirationWatchdog, WatchdogSettings};
use fulfillment_shared::{
    config::AppConfig,
    database::Database,
    kafka::KafkaProducer,
    observability,
    store::{PgStoreFactory, StoreFactory},
};
use futures::future::join_all;
use notification_worker::{EmailSender, NotificationConsumer, NotificationSink};
use order_processor::{
    OrderCreatedConsumer, OrderLifecycleProcessor, ProcessorSettings, RandomPaymentOutcome,
};
use tokio::sync::watch;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "fulfillment-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        environment = %config.environment,
        brokers = %config.kafka.brokers,
        "Starting fulfillment-service..."
    );

    // 基础设施：连接池与生产者由三个后台任务共享
    let db = Database::connect(&config.database).await?;
    db.health_check().await?;
    let stores: Arc<dyn StoreFactory> = Arc::new(PgStoreFactory::new(&db));
    let producer = Arc::new(KafkaProducer::new(&config.kafka)?);

    let payment = Arc::new(RandomPaymentOutcome::new(
        config.pipeline.payment_success_rate,
        config.pipeline.payment_seed,
    ));
    let processor = OrderLifecycleProcessor::new(
        stores.clone(),
        producer.clone(),
        payment,
        ProcessorSettings::from_config(&config),
    );
    let order_consumer = OrderCreatedConsumer::new(&config, processor)?;

    let sink = NotificationSink::new(stores.clone(), Arc::new(EmailSender));
    let notification_consumer = NotificationConsumer::new(&config, sink)?;

    let watchdog = ExpirationWatchdog::new(
        stores,
        producer.clone(),
        WatchdogSettings::from_config(&config),
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tasks = vec![
        tokio::spawn({
            let shutdown = shutdown_rx.clone();
            async move {
                if let Err(e) = order_consumer.run(shutdown).await {
                    error!(error = %e, "订单生命周期处理器异常退出");
                }
            }
        }),
        tokio::spawn({
            let shutdown = shutdown_rx.clone();
            async move {
                if let Err(e) = notification_consumer.run(shutdown).await {
                    error!(error = %e, "通知落库消费者异常退出");
                }
            }
        }),
        tokio::spawn(async move { watchdog.run(shutdown_rx).await }),
    ];

    info!("履约管道已启动");
    shutdown_signal().await;

    // 通知所有后台任务停止，并等待当前工作单元结束
    if let Err(e) = shutdown_tx.send(true) {
        warn!(error = %e, "关闭信号无人接收，后台任务均已退出");
    }
    for result in join_all(tasks).await {
        if let Err(e) = result {
            error!(error = %e, "后台任务异常终止");
        }
    }

    let flush_timeout = Duration::from_secs(config.kafka.producer.flush_timeout_seconds);
    if let Err(e) = producer.flush(flush_timeout) {
        warn!(error = %e, "关闭前未能刷出全部待发送消息");
    }
    db.close().await;

    info!("fulfillment-service shutdown complete");
    Ok(())
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
