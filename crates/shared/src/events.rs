//! 订单事件模型
//!
//! 定义在三个 topic 上流转的事件负载。字段名采用 PascalCase，
//! 与下单接口层写出的 JSON 保持一致；金额以 JSON 数值传输。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Order, OrderItem};

/// 所有订单事件的公共行为
///
/// 消息 key 统一取订单 ID，保证同一订单的事件落在同一分区并按发布顺序消费。
pub trait OrderEvent: Serialize + Send + Sync {
    /// 事件类型名，用于日志与指标标签
    fn event_type(&self) -> &'static str;

    fn order_id(&self) -> i32;

    /// Kafka 消息 key
    fn partition_key(&self) -> String {
        self.order_id().to_string()
    }
}

// ---------------------------------------------------------------------------
// OrderCreatedEvent
// ---------------------------------------------------------------------------

/// 下单成功后由接口层发布，订单生命周期处理器消费
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderCreatedEvent {
    pub order_id: i32,
    pub user_id: i32,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
}

impl OrderCreatedEvent {
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            total: order.total,
            created_at: order.created_at,
        }
    }
}

impl OrderEvent for OrderCreatedEvent {
    fn event_type(&self) -> &'static str {
        "OrderCreated"
    }

    fn order_id(&self) -> i32 {
        self.order_id
    }
}

// ---------------------------------------------------------------------------
// OrderCompletedEvent
// ---------------------------------------------------------------------------

/// 完成事件中的明细快照，与订单当时的明细完全一致，之后不随商品变化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderItemSnapshot {
    pub id: i32,
    pub product_id: i32,
    pub product_name: String,
    pub quantity: i32,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

impl From<&OrderItem> for OrderItemSnapshot {
    fn from(item: &OrderItem) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            quantity: item.quantity,
            price: item.price,
        }
    }
}

/// 支付成功后由生命周期处理器发布，通知消费者消费
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderCompletedEvent {
    pub order_id: i32,
    pub user_id: i32,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    pub items: Vec<OrderItemSnapshot>,
    pub completed_at: DateTime<Utc>,
}

impl OrderCompletedEvent {
    /// 以订单持久化后的金额与明细构造快照
    pub fn from_order(order: &Order, completed_at: DateTime<Utc>) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            total: order.total,
            items: order.items.iter().map(OrderItemSnapshot::from).collect(),
            completed_at,
        }
    }
}

impl OrderEvent for OrderCompletedEvent {
    fn event_type(&self) -> &'static str {
        "OrderCompleted"
    }

    fn order_id(&self) -> i32 {
        self.order_id
    }
}

// ---------------------------------------------------------------------------
// OrderExpiredEvent
// ---------------------------------------------------------------------------

/// 过期巡检回收订单后发布，通知消费者消费
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderExpiredEvent {
    pub order_id: i32,
    pub user_id: i32,
    pub expired_at: DateTime<Utc>,
}

impl OrderEvent for OrderExpiredEvent {
    fn event_type(&self) -> &'static str {
        "OrderExpired"
    }

    fn order_id(&self) -> i32 {
        self.order_id
    }
}
