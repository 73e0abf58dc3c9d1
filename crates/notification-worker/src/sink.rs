//! 通知落库
//!
//! 每个完成/过期事件写入一条通知审计记录，随后经发送器发出。
//! 只读订单相关数据，从不修改订单状态。

use std::sync::Arc;

use fulfillment_shared::events::{OrderCompletedEvent, OrderExpiredEvent};
use fulfillment_shared::models::{NewNotification, NotificationStatus, User};
use fulfillment_shared::observability::metrics;
use fulfillment_shared::store::StoreFactory;
use tracing::{info, instrument, warn};

use crate::error::NotificationError;
use crate::sender::NotificationSender;
use crate::templates::NotificationTemplateEngine;

pub struct NotificationSink {
    stores: Arc<dyn StoreFactory>,
    sender: Arc<dyn NotificationSender>,
}

impl NotificationSink {
    pub fn new(stores: Arc<dyn StoreFactory>, sender: Arc<dyn NotificationSender>) -> Self {
        Self { stores, sender }
    }

    /// 记录订单完成通知，返回审计记录 ID
    #[instrument(skip(self, event), fields(order_id = event.order_id, user_id = event.user_id))]
    pub async fn record_completed(
        &self,
        event: &OrderCompletedEvent,
    ) -> Result<i32, NotificationError> {
        self.record(event.order_id, event.user_id, NotificationStatus::OrderCompleted, |user| {
            NotificationTemplateEngine::render_completed(user, event)
        })
        .await
    }

    /// 记录订单过期通知，返回审计记录 ID
    #[instrument(skip(self, event), fields(order_id = event.order_id, user_id = event.user_id))]
    pub async fn record_expired(&self, event: &OrderExpiredEvent) -> Result<i32, NotificationError> {
        self.record(event.order_id, event.user_id, NotificationStatus::OrderExpired, |user| {
            NotificationTemplateEngine::render_expired(user, event)
        })
        .await
    }

    async fn record(
        &self,
        order_id: i32,
        user_id: i32,
        status: NotificationStatus,
        render: impl FnOnce(&User) -> String,
    ) -> Result<i32, NotificationError> {
        let mut store = self.stores.open().await?;

        let user = store
            .get_user(user_id)
            .await?
            .ok_or(NotificationError::UserNotFound { user_id, order_id })?;

        let notification = NewNotification::new(user_id, order_id, render(&user), status);
        let body = notification.message.clone();
        let notification_id = store.append_notification(notification).await?;
        drop(store);

        metrics::record_notification(status);
        info!(notification_id, order_id, ?status, "通知已落库");

        // 审计记录已写入，发送失败只记录日志
        let subject = NotificationTemplateEngine::render_subject(status);
        match self.sender.send(&user, subject, &body).await {
            Ok(receipt) => info!(
                notification_id,
                channel = receipt.channel,
                message_id = %receipt.message_id,
                "通知已发送"
            ),
            Err(e) => warn!(notification_id, error = %e, "通知发送失败"),
        }

        Ok(notification_id)
    }
}
