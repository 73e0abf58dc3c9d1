//! 事件发布抽象
//!
//! `EventPublisher` 是管道各组件依赖的发布接口，生产环境由 `KafkaProducer` 实现，
//! 测试中替换为内存记录实现。序列化、指标与重试都在本模块统一处理。

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::config::TopicConfig;
use crate::error::FulfillmentError;
use crate::events::{OrderCreatedEvent, OrderEvent};
use crate::models::Order;
use crate::observability::metrics;
use crate::retry::{RetryPolicy, retry_with_policy};

/// 消息投递坐标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// 事件发布器
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// 发送已编码的负载，返回投递坐标；重试耗尽后返回错误
    async fn publish_bytes(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Result<DeliveryReceipt, FulfillmentError>;
}

/// 将事件编码为 JSON 并以订单 ID 为 key 发布
pub async fn publish_event<E: OrderEvent>(
    publisher: &dyn EventPublisher,
    topic: &str,
    event: &E,
) -> Result<DeliveryReceipt, FulfillmentError> {
    let payload = serde_json::to_vec(event)
        .map_err(|e| FulfillmentError::Internal(format!("事件序列化失败: {e}")))?;
    let key = event.partition_key();

    match publisher.publish_bytes(topic, &key, payload).await {
        Ok(receipt) => {
            metrics::record_published(topic, true);
            info!(
                topic,
                key = %key,
                event_type = event.event_type(),
                partition = receipt.partition,
                offset = receipt.offset,
                "事件已发布"
            );
            Ok(receipt)
        }
        Err(e) => {
            metrics::record_published(topic, false);
            warn!(
                topic,
                key = %key,
                event_type = event.event_type(),
                error = %e,
                "事件发布失败"
            );
            Err(e)
        }
    }
}

/// 带应用层重试的发布，用于状态已变更后必须尽力送达的事件
pub async fn publish_event_with_retry<E: OrderEvent>(
    publisher: &dyn EventPublisher,
    topic: &str,
    event: &E,
    policy: &RetryPolicy,
) -> Result<DeliveryReceipt, FulfillmentError> {
    retry_with_policy(
        policy,
        event.event_type(),
        FulfillmentError::is_retryable,
        || publish_event(publisher, topic, event),
    )
    .await
}

/// 下单边界：订单已落库后宣告 "order created"
///
/// 发布失败不影响下单结果，只记录错误并返回 `None`。
pub async fn announce_order_created(
    publisher: &dyn EventPublisher,
    topics: &TopicConfig,
    order: &Order,
) -> Option<DeliveryReceipt> {
    let event = OrderCreatedEvent::from_order(order);

    match publish_event(publisher, &topics.order_created, &event).await {
        Ok(receipt) => Some(receipt),
        Err(e) => {
            error!(
                order_id = order.id,
                error = %e,
                "订单已创建但 OrderCreated 事件发布失败，订单将不会进入支付流程"
            );
            None
        }
    }
}
