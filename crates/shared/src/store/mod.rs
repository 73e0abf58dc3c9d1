//! 订单库访问接口
//!
//! 管道组件只通过 `OrderStore` 读写订单库。每个工作单元经 `StoreFactory::open`
//! 取得一个新的句柄，完成读改写后立即释放，句柄不跨越支付等待等挂起点。

mod postgres;

pub use postgres::{PgOrderStore, PgStoreFactory};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{NewNotification, Order, OrderStatus, User};

/// 单个工作单元的订单库句柄
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait OrderStore: Send {
    /// 读取订单；`with_items` 为 true 时同时带出明细及商品名称
    async fn get_order(&mut self, order_id: i32, with_items: bool) -> Result<Option<Order>>;

    /// 带守卫的状态更新
    ///
    /// 仅当订单当前状态属于 `expected` 时写入 `new_status` 与 `updated_at`，
    /// 返回是否实际更新。守卫不满足（订单已被其他组件推进）时返回 `Ok(false)`。
    async fn update_order_status(
        &mut self,
        order_id: i32,
        expected: &[OrderStatus],
        new_status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// 查询处于 `status` 且 `updated_at` 严格早于 `updated_before` 的订单（不含明细）
    async fn query_orders(
        &mut self,
        status: OrderStatus,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Order>>;

    /// 追加一条通知审计记录，返回新记录 ID
    async fn append_notification(&mut self, notification: NewNotification) -> Result<i32>;

    async fn get_user(&mut self, user_id: i32) -> Result<Option<User>>;
}

/// 订单库句柄工厂
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn OrderStore>>;
}

/// 按状态机守卫推进订单状态
///
/// 前置状态集合取自 `OrderStatus::allowed_sources`，调用方无需关心图的细节。
pub async fn transition_order(
    store: &mut dyn OrderStore,
    order_id: i32,
    new_status: OrderStatus,
    updated_at: DateTime<Utc>,
) -> Result<bool> {
    let expected = OrderStatus::allowed_sources(new_status);
    if expected.is_empty() {
        return Ok(false);
    }
    store
        .update_order_status(order_id, expected, new_status, updated_at)
        .await
}
