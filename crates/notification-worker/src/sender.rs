//! 通知发送器
//!
//! 通过 `NotificationSender` trait 抽象发送行为。当前只有模拟邮件发送（仅记录日志），
//! 通知内容以审计记录为准，发送失败不影响落库结果。

use async_trait::async_trait;
use fulfillment_shared::models::User;
use tracing::info;
use uuid::Uuid;

use crate::error::NotificationError;

/// 发送回执
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub channel: &'static str,
    /// 外部渠道返回的消息标识，用于追踪投递状态
    pub message_id: String,
}

#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        recipient: &User,
        subject: &str,
        body: &str,
    ) -> Result<SendReceipt, NotificationError>;
}

/// 模拟邮件发送器
pub struct EmailSender;

#[async_trait]
impl NotificationSender for EmailSender {
    async fn send(
        &self,
        recipient: &User,
        subject: &str,
        body: &str,
    ) -> Result<SendReceipt, NotificationError> {
        let message_id = Uuid::now_v7().to_string();

        info!(
            channel = "EMAIL",
            to = %recipient.email,
            user_id = recipient.id,
            message_id = %message_id,
            subject,
            body,
            "模拟发送邮件通知"
        );

        Ok(SendReceipt {
            channel: "EMAIL",
            message_id,
        })
    }
}
