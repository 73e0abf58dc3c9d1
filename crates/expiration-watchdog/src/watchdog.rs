//! 订单过期巡检
//!
//! 以固定间隔扫描长时间停留在 Processing 的订单：
//! 1. cutoff = now - threshold，查询 `updated_at < cutoff` 的 Processing 订单
//! 2. 逐条守卫更新 Processing -> Expired，刷新 updated_at
//! 3. 更新生效后发布 OrderExpired 事件（带重试）
//!
//! 先落库后发布：进程在两步之间崩溃会漏发该订单的过期事件，但不会重复过期。
//! 守卫更新未生效说明订单已被处理器完成，直接跳过。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fulfillment_shared::config::AppConfig;
use fulfillment_shared::events::OrderExpiredEvent;
use fulfillment_shared::models::{Order, OrderStatus};
use fulfillment_shared::observability::metrics;
use fulfillment_shared::publisher::{EventPublisher, publish_event_with_retry};
use fulfillment_shared::retry::RetryPolicy;
use fulfillment_shared::store::{StoreFactory, transition_order};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::WatchdogError;

/// 单次巡检结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// 查询到的超时订单数
    pub candidates: usize,
    /// 实际过期的订单数
    pub expired: usize,
    /// 查询后已被其他组件推进、未过期的订单数
    pub skipped: usize,
    /// 已过期但事件发布失败或被关闭信号中断的订单数
    pub publish_failed: usize,
    /// 因关闭信号未处理、仍停留在 Processing 的订单数
    pub abandoned: usize,
}

#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub check_interval: Duration,
    pub threshold: Duration,
    pub expired_topic: String,
    pub publish_policy: RetryPolicy,
}

impl WatchdogSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            check_interval: config.pipeline.expiration_check_interval(),
            threshold: config.pipeline.expiration_threshold(),
            expired_topic: config.kafka.topics.order_expired.clone(),
            publish_policy: RetryPolicy::for_publishing(config.pipeline.publish_max_retries),
        }
    }
}

/// 订单过期巡检器
pub struct ExpirationWatchdog {
    stores: Arc<dyn StoreFactory>,
    publisher: Arc<dyn EventPublisher>,
    settings: WatchdogSettings,
    threshold: chrono::Duration,
}

impl ExpirationWatchdog {
    pub fn new(
        stores: Arc<dyn StoreFactory>,
        publisher: Arc<dyn EventPublisher>,
        settings: WatchdogSettings,
    ) -> Result<Self, WatchdogError> {
        if settings.check_interval.is_zero() {
            return Err(WatchdogError::ZeroInterval);
        }
        let threshold = chrono::Duration::from_std(settings.threshold)
            .map_err(|_| WatchdogError::InvalidThreshold(settings.threshold))?;

        Ok(Self {
            stores,
            publisher,
            settings,
            threshold,
        })
    }

    /// 主循环：首次巡检在一个间隔之后，收到关闭信号即退出
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            check_interval = ?self.settings.check_interval,
            threshold = ?self.settings.threshold,
            "过期巡检已启动"
        );

        let period = self.settings.check_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }

                _ = ticker.tick() => {}
            }

            if let Err(e) = self.tick(Utc::now(), &mut shutdown).await {
                error!(error = %e, "过期巡检失败，下个周期重试");
            }
        }

        info!("过期巡检已停止");
    }

    /// 执行一次巡检，`now` 由调用方注入
    ///
    /// 每处理一个订单前检查关闭信号；收到信号后剩余订单留到重启后的巡检，
    /// 正在进行的事件发布也会被中断。
    pub async fn tick(
        &self,
        now: DateTime<Utc>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<TickReport, WatchdogError> {
        if *shutdown.borrow() {
            return Ok(TickReport::default());
        }

        let started = Instant::now();
        let cutoff = now - self.threshold;

        let candidates = {
            let mut store = self.stores.open().await?;
            store.query_orders(OrderStatus::Processing, cutoff).await?
        };

        let mut report = TickReport {
            candidates: candidates.len(),
            ..TickReport::default()
        };

        if candidates.is_empty() {
            debug!(%cutoff, "没有超时订单");
            return Ok(report);
        }

        info!(count = candidates.len(), %cutoff, "发现超时订单，开始回收");

        for (idx, order) in candidates.iter().enumerate() {
            if *shutdown.borrow() {
                report.abandoned = candidates.len() - idx;
                info!(abandoned = report.abandoned, "收到关闭信号，中止本轮巡检");
                break;
            }

            if !self.expire(order, now).await? {
                report.skipped += 1;
                continue;
            }
            report.expired += 1;

            let published = tokio::select! {
                biased;

                published = self.publish_expired(order, now) => published,

                Ok(()) = shutdown.changed() => {
                    error!(order_id = order.id, "关闭信号中断了过期事件发布，需要人工补发");
                    false
                }
            };
            if !published {
                report.publish_failed += 1;
            }
        }

        metrics::record_expiration_sweep(report.expired, started.elapsed().as_secs_f64());
        info!(
            candidates = report.candidates,
            expired = report.expired,
            skipped = report.skipped,
            publish_failed = report.publish_failed,
            abandoned = report.abandoned,
            "过期巡检完成"
        );

        Ok(report)
    }

    async fn expire(&self, order: &Order, now: DateTime<Utc>) -> Result<bool, WatchdogError> {
        let mut store = self.stores.open().await?;
        let applied = transition_order(&mut *store, order.id, OrderStatus::Expired, now).await?;

        if applied {
            metrics::record_transition(OrderStatus::Expired);
            debug!(order_id = order.id, last_update = %order.updated_at, "订单已过期");
        } else {
            metrics::record_transition_skipped(OrderStatus::Expired);
            warn!(order_id = order.id, "订单已被其他组件推进，跳过过期");
        }
        Ok(applied)
    }

    async fn publish_expired(&self, order: &Order, expired_at: DateTime<Utc>) -> bool {
        let event = OrderExpiredEvent {
            order_id: order.id,
            user_id: order.user_id,
            expired_at,
        };

        match publish_event_with_retry(
            self.publisher.as_ref(),
            &self.settings.expired_topic,
            &event,
            &self.settings.publish_policy,
        )
        .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(
                    order_id = order.id,
                    error = %e,
                    "订单已过期但过期事件发布失败，通知将缺失，需要人工补发"
                );
                false
            }
        }
    }
}
