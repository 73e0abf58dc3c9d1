//! 统一错误处理模块
//!
//! 定义履约管道中所有共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 消费循环依赖 `is_retryable` 区分"回退重投"与"确认丢弃"两种处理方式。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum FulfillmentError {
    // ==================== 存储错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("存储暂时不可用: {0}")]
    Store(String),

    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    #[error("消息负载无效: {0}")]
    InvalidPayload(String),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 通用错误 ====================
    /// 收到关闭信号时中止在途处理，不是故障
    #[error("处理已取消")]
    Cancelled,

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, FulfillmentError>;

impl FulfillmentError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Store(_) => "STORE_UNAVAILABLE",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 只有存储与 broker 的瞬时故障可以通过重投恢复；
    /// 负载损坏、配置错误等永久错误重投多少次结果都一样。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Store(_) | Self::Kafka(_))
    }

    /// 是否为关闭信号导致的中止
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
