//! 通知落库错误类型
//!
//! 用户缺失属于永久错误，直接确认消息；共享库错误按是否可重试决定重投。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("用户不存在: user_id={user_id}, order_id={order_id}")]
    UserNotFound { user_id: i32, order_id: i32 },

    #[error("通知发送失败: 渠道={channel}, 原因={reason}")]
    SendFailed { channel: String, reason: String },

    #[error(transparent)]
    Shared(#[from] fulfillment_shared::error::FulfillmentError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use fulfillment_shared::error::FulfillmentError;

    #[test]
    fn test_error_display() {
        let err = NotificationError::UserNotFound {
            user_id: 7,
            order_id: 42,
        };
        assert_eq!(err.to_string(), "用户不存在: user_id=7, order_id=42");

        let err = NotificationError::SendFailed {
            channel: "EMAIL".to_string(),
            reason: "SMTP 超时".to_string(),
        };
        assert_eq!(err.to_string(), "通知发送失败: 渠道=EMAIL, 原因=SMTP 超时");

        let err = NotificationError::from(FulfillmentError::Store("连接池耗尽".to_string()));
        assert_eq!(err.to_string(), "存储暂时不可用: 连接池耗尽");
    }
}
