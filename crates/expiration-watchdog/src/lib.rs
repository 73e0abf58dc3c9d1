//! 订单过期巡检
//!
//! 周期性回收长时间停留在 Processing 的订单，并为每个回收的订单发布 OrderExpired 事件。

pub mod error;
pub mod watchdog;

pub use error::WatchdogError;
pub use watchdog::{ExpirationWatchdog, TickReport, WatchdogSettings};
