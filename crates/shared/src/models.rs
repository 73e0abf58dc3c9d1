//! 订单履约领域模型
//!
//! 订单、订单明细、用户与通知审计记录。状态枚举以 smallint 持久化，
//! 与订单库中已有的数值保持一致。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 订单状态
///
/// 合法流转只有：
/// - Pending -> Processing（生命周期处理器）
/// - Processing -> Processing（支付失败，保持原状态）
/// - Processing -> Completed（支付成功）
/// - Processing -> Expired（过期巡检回收）
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[repr(i16)]
pub enum OrderStatus {
    #[default]
    Pending = 0,
    Processing = 1,
    Completed = 2,
    Cancelled = 3,
    Expired = 4,
}

impl OrderStatus {
    /// 终态订单不再被任何管道组件修改
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    /// 状态机是否允许从当前状态流转到 `next`
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (*self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Expired)
        )
    }

    /// 能够流转到 `next` 的全部前置状态
    pub fn allowed_sources(next: OrderStatus) -> &'static [OrderStatus] {
        match next {
            Self::Processing => &[Self::Pending, Self::Processing],
            Self::Completed | Self::Expired => &[Self::Processing],
            Self::Pending | Self::Cancelled => &[],
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
            Self::Expired => "Expired",
        };
        write!(f, "{s}")
    }
}

/// 订单明细（读取时联表带出商品名称，作为快照使用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: i32,
    pub order_id: i32,
    pub product_id: i32,
    pub product_name: String,
    pub quantity: i32,
    pub price: Decimal,
}

/// 订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: i32,
    pub user_id: i32,
    /// NUMERIC(10,2)
    pub total: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 仅在 `with_items = true` 读取时填充
    #[sqlx(skip)]
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

/// 用户（管道只读）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
}

/// 通知类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
pub enum NotificationStatus {
    OrderCompleted = 0,
    OrderExpired = 1,
}

/// 通知消息在库中的最大长度
pub const NOTIFICATION_MESSAGE_MAX_LEN: usize = 500;

/// 待写入的通知审计记录（id 由存储分配）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: i32,
    pub order_id: i32,
    pub message: String,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
}

impl NewNotification {
    /// 构造通知记录，超长消息按字符边界截断到列宽以内
    pub fn new(user_id: i32, order_id: i32, message: String, status: NotificationStatus) -> Self {
        let message = if message.chars().count() > NOTIFICATION_MESSAGE_MAX_LEN {
            message.chars().take(NOTIFICATION_MESSAGE_MAX_LEN).collect()
        } else {
            message
        };

        Self {
            user_id,
            order_id,
            message,
            status,
            created_at: Utc::now(),
        }
    }
}

/// 已持久化的通知审计记录，写入后不再更新
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i32,
    pub user_id: i32,
    pub order_id: i32,
    pub message: String,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
