//! 共享库
//!
//! 履约管道各组件共用的配置、错误处理、订单库访问、Kafka 收发与可观测性基础设施。

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod kafka;
pub mod models;
pub mod observability;
pub mod publisher;
pub mod retry;
pub mod store;
pub mod test_utils;
