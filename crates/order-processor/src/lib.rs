//! 订单生命周期处理器
//!
//! 消费 order-created 事件，推进订单进入 Processing，模拟支付后
//! 将成功的订单推进到 Completed 并发布 order-completed 事件。

pub mod consumer;
pub mod error;
pub mod payment;
pub mod processor;

pub use consumer::{OrderCreatedConsumer, handle_message};
pub use error::ProcessorError;
pub use payment::{FixedPaymentOutcome, PaymentOutcome, RandomPaymentOutcome};
pub use processor::{OrderLifecycleProcessor, ProcessOutcome, ProcessorSettings};
