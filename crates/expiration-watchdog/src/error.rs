//! 过期巡检错误类型

use std::time::Duration;

use fulfillment_shared::error::FulfillmentError;

#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    #[error("过期阈值无效: {0:?}")]
    InvalidThreshold(Duration),

    #[error("巡检间隔不能为 0")]
    ZeroInterval,

    #[error(transparent)]
    Shared(#[from] FulfillmentError),
}
