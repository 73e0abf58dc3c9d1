//! 通知落库服务
//!
//! 消费订单完成与过期事件，为每个事件写入一条通知审计记录并模拟邮件发送。
//! 不修改订单状态。

pub mod consumer;
pub mod error;
pub mod sender;
pub mod sink;
pub mod templates;

pub use consumer::{NotificationConsumer, handle_message};
pub use error::NotificationError;
pub use sender::{EmailSender, NotificationSender};
pub use sink::NotificationSink;
