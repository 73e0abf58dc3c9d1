//! PostgreSQL 订单库实现

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::debug;

use super::{OrderStore, StoreFactory};
use crate::database::Database;
use crate::error::Result;
use crate::models::{NewNotification, Order, OrderItem, OrderStatus, User};

/// 每次 `open` 从连接池借出一个连接
#[derive(Clone)]
pub struct PgStoreFactory {
    pool: PgPool,
}

impl PgStoreFactory {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl StoreFactory for PgStoreFactory {
    async fn open(&self) -> Result<Box<dyn OrderStore>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgOrderStore { conn }))
    }
}

/// 持有一个池化连接，drop 时归还
pub struct PgOrderStore {
    conn: PoolConnection<Postgres>,
}

impl PgOrderStore {
    async fn load_items(&mut self, order_id: i32) -> Result<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(
            r#"
            SELECT oi.id, oi.order_id, oi.product_id, p.name AS product_name,
                   oi.quantity, oi.price
            FROM order_items oi
            JOIN products p ON p.id = oi.product_id
            WHERE oi.order_id = $1
            ORDER BY oi.id
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(items)
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn get_order(&mut self, order_id: i32, with_items: bool) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, total, status, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&mut *self.conn)
        .await?;

        let Some(mut order) = order else {
            return Ok(None);
        };

        if with_items {
            order.items = self.load_items(order_id).await?;
        }
        Ok(Some(order))
    }

    async fn update_order_status(
        &mut self,
        order_id: i32,
        expected: &[OrderStatus],
        new_status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let expected: Vec<i16> = expected.iter().map(|s| *s as i16).collect();

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, updated_at = $3
            WHERE id = $1 AND status = ANY($4)
            "#,
        )
        .bind(order_id)
        .bind(new_status)
        .bind(updated_at)
        .bind(&expected)
        .execute(&mut *self.conn)
        .await?;

        let applied = result.rows_affected() == 1;
        debug!(order_id, %new_status, applied, "订单状态更新");
        Ok(applied)
    }

    async fn query_orders(
        &mut self,
        status: OrderStatus,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, total, status, created_at, updated_at
            FROM orders
            WHERE status = $1 AND updated_at < $2
            ORDER BY updated_at, id
            "#,
        )
        .bind(status)
        .bind(updated_before)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(orders)
    }

    async fn append_notification(&mut self, notification: NewNotification) -> Result<i32> {
        let id = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO notifications (user_id, order_id, message, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING id
            "#,
        )
        .bind(notification.user_id)
        .bind(notification.order_id)
        .bind(&notification.message)
        .bind(notification.status)
        .bind(notification.created_at)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(id)
    }

    async fn get_user(&mut self, user_id: i32) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT id, name, email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(user)
    }
}
