//! 订单生命周期处理器错误类型

use fulfillment_shared::error::FulfillmentError;
use fulfillment_shared::models::OrderStatus;

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// 事件引用的订单不存在，重投也不会出现
    #[error("订单不存在: {order_id}")]
    OrderNotFound { order_id: i32 },

    /// 订单已处于终态，重复投递的 OrderCreated 不再处理
    #[error("订单已结束: order_id={order_id}, status={status}")]
    AlreadyFinalized { order_id: i32, status: OrderStatus },

    /// 读取之后订单被其他组件推进，守卫更新未生效
    #[error("订单状态已变化，放弃流转: order_id={order_id}, to={to}")]
    TransitionRejected { order_id: i32, to: OrderStatus },

    #[error(transparent)]
    Shared(#[from] FulfillmentError),
}

impl ProcessorError {
    /// 确认消息即可，不需要重投
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Shared(e) => !e.is_retryable() && !e.is_cancelled(),
            _ => true,
        }
    }
}

/// 交回消费循环的错误；非共享错误都是永久错误，原样转为内部错误
impl From<ProcessorError> for FulfillmentError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::Shared(e) => e,
            other => FulfillmentError::Internal(other.to_string()),
        }
    }
}
