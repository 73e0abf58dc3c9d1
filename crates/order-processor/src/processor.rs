//! 订单生命周期处理
//!
//! 对每条 OrderCreated 事件执行：
//! 1. 读取订单（含明细），终态订单直接确认
//! 2. Pending/Processing -> Processing
//! 3. 释放订单库句柄，等待模拟支付
//! 4. 判定支付结果；失败则保持 Processing
//! 5. 成功则 Processing -> Completed，并以落库后的金额与明细发布完成事件
//!
//! 每一步都重新打开订单库句柄，任何句柄都不会跨越支付等待。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fulfillment_shared::config::AppConfig;
use fulfillment_shared::error::FulfillmentError;
use fulfillment_shared::events::{OrderCompletedEvent, OrderCreatedEvent};
use fulfillment_shared::models::{Order, OrderStatus};
use fulfillment_shared::observability::metrics;
use fulfillment_shared::publisher::{EventPublisher, publish_event_with_retry};
use fulfillment_shared::retry::RetryPolicy;
use fulfillment_shared::store::{StoreFactory, transition_order};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProcessorError;
use crate::payment::PaymentOutcome;

/// 单条事件的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// 订单已完成；`published` 表示完成事件是否送达
    Completed { published: bool },
    /// 支付失败，订单保持 Processing，等待过期巡检回收
    PaymentDeclined,
    /// 等待支付期间订单已被过期巡检回收
    Superseded,
}

/// 处理器运行参数
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub completed_topic: String,
    pub payment_delay: Duration,
    pub publish_policy: RetryPolicy,
}

impl ProcessorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            completed_topic: config.kafka.topics.order_completed.clone(),
            payment_delay: config.pipeline.payment_delay(),
            publish_policy: RetryPolicy::for_publishing(config.pipeline.publish_max_retries),
        }
    }
}

/// 订单生命周期处理器
pub struct OrderLifecycleProcessor {
    stores: Arc<dyn StoreFactory>,
    publisher: Arc<dyn EventPublisher>,
    payment: Arc<dyn PaymentOutcome>,
    settings: ProcessorSettings,
}

impl OrderLifecycleProcessor {
    pub fn new(
        stores: Arc<dyn StoreFactory>,
        publisher: Arc<dyn EventPublisher>,
        payment: Arc<dyn PaymentOutcome>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            stores,
            publisher,
            payment,
            settings,
        }
    }

    /// 处理一条 OrderCreated 事件
    ///
    /// 支付等待期间收到关闭信号时返回 `FulfillmentError::Cancelled`，
    /// 订单停留在 Processing，消息位点不提交。
    #[instrument(skip(self, event, shutdown), fields(order_id = event.order_id))]
    pub async fn process(
        &self,
        event: &OrderCreatedEvent,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<ProcessOutcome, ProcessorError> {
        let order_id = event.order_id;

        self.begin_processing(order_id).await?;

        self.wait_for_payment(shutdown).await?;

        let success = self.payment.decide_success();
        metrics::record_payment(success);
        if !success {
            info!(order_id, "支付失败，订单保持 Processing");
            return Ok(ProcessOutcome::PaymentDeclined);
        }

        let Some(order) = self.complete(order_id).await? else {
            return Ok(ProcessOutcome::Superseded);
        };

        let published = self.publish_completed(&order).await;
        Ok(ProcessOutcome::Completed { published })
    }

    /// 读取订单并推进到 Processing
    async fn begin_processing(&self, order_id: i32) -> Result<(), ProcessorError> {
        let mut store = self.stores.open().await?;

        let order = store
            .get_order(order_id, true)
            .await?
            .ok_or(ProcessorError::OrderNotFound { order_id })?;

        if order.status.is_terminal() {
            return Err(ProcessorError::AlreadyFinalized {
                order_id,
                status: order.status,
            });
        }

        if !transition_order(&mut *store, order_id, OrderStatus::Processing, Utc::now()).await? {
            metrics::record_transition_skipped(OrderStatus::Processing);
            return Err(ProcessorError::TransitionRejected {
                order_id,
                to: OrderStatus::Processing,
            });
        }

        metrics::record_transition(OrderStatus::Processing);
        debug!(order_id, from = %order.status, "订单进入 Processing");
        Ok(())
    }

    async fn wait_for_payment(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), FulfillmentError> {
        if *shutdown.borrow() {
            return Err(FulfillmentError::Cancelled);
        }

        tokio::select! {
            _ = tokio::time::sleep(self.settings.payment_delay) => Ok(()),
            _ = shutdown.changed() => Err(FulfillmentError::Cancelled),
        }
    }

    /// 推进到 Completed 并返回用于构造完成事件的订单快照
    ///
    /// 订单已不在 Processing（被过期巡检抢先回收）时返回 `None`。
    async fn complete(&self, order_id: i32) -> Result<Option<Order>, ProcessorError> {
        let mut store = self.stores.open().await?;

        let mut order = store
            .get_order(order_id, true)
            .await?
            .ok_or(ProcessorError::OrderNotFound { order_id })?;

        if order.status != OrderStatus::Processing {
            warn!(order_id, status = %order.status, "支付完成时订单已不在 Processing，不再完成");
            metrics::record_transition_skipped(OrderStatus::Completed);
            return Ok(None);
        }

        let completed_at = Utc::now();
        if !transition_order(&mut *store, order_id, OrderStatus::Completed, completed_at).await? {
            warn!(order_id, "订单在完成前被过期巡检回收");
            metrics::record_transition_skipped(OrderStatus::Completed);
            return Ok(None);
        }

        metrics::record_transition(OrderStatus::Completed);
        order.status = OrderStatus::Completed;
        order.updated_at = completed_at;
        Ok(Some(order))
    }

    /// 发布完成事件；状态已落库，失败只记录日志
    async fn publish_completed(&self, order: &Order) -> bool {
        let event = OrderCompletedEvent::from_order(order, order.updated_at);

        match publish_event_with_retry(
            self.publisher.as_ref(),
            &self.settings.completed_topic,
            &event,
            &self.settings.publish_policy,
        )
        .await
        {
            Ok(_) => {
                info!(order_id = order.id, total = %order.total, "订单已完成");
                true
            }
            Err(e) => {
                error!(
                    order_id = order.id,
                    error = %e,
                    "订单已完成但完成事件发布失败，通知将缺失，需要人工补发"
                );
                false
            }
        }
    }
}
