//! 通知消费者
//!
//! 同时订阅 order-completed 与 order-expired，按消息所在 topic 分发。

use fulfillment_shared::config::{AppConfig, TopicConfig};
use fulfillment_shared::error::FulfillmentError;
use fulfillment_shared::events::{OrderCompletedEvent, OrderExpiredEvent};
use fulfillment_shared::kafka::{ConsumerMessage, KafkaConsumer};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::NotificationError;
use crate::sink::NotificationSink;

pub struct NotificationConsumer {
    consumer: KafkaConsumer,
    sink: NotificationSink,
    topics: TopicConfig,
    redelivery_backoff: Duration,
}

impl NotificationConsumer {
    pub fn new(config: &AppConfig, sink: NotificationSink) -> Result<Self, NotificationError> {
        let consumer = KafkaConsumer::new(&config.kafka, &config.kafka.notification_group)?;
        Ok(Self {
            consumer,
            sink,
            topics: config.kafka.topics.clone(),
            redelivery_backoff: config.pipeline.redelivery_backoff(),
        })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), NotificationError> {
        self.consumer.subscribe(&[
            self.topics.order_completed.as_str(),
            self.topics.order_expired.as_str(),
        ])?;

        info!(
            completed_topic = %self.topics.order_completed,
            expired_topic = %self.topics.order_expired,
            "通知消费者已启动"
        );

        let sink = self.sink;
        let topics = self.topics;

        self.consumer
            .start(shutdown, self.redelivery_backoff, |msg| {
                let sink = &sink;
                let topics = &topics;
                async move { handle_message(sink, topics, &msg).await }
            })
            .await;

        info!("通知消费者已停止");
        Ok(())
    }
}

/// 处理单条通知事件
///
/// 拆分为独立函数，便于在测试中直接调用而无需构造 Kafka 消费者。
/// 用户缺失与未知 topic 直接确认；订单库瞬时故障以 `Err` 返回触发重投。
pub async fn handle_message(
    sink: &NotificationSink,
    topics: &TopicConfig,
    msg: &ConsumerMessage,
) -> Result<(), FulfillmentError> {
    let result = if msg.topic == topics.order_completed {
        let event: OrderCompletedEvent = msg.deserialize_payload()?;
        info!(order_id = event.order_id, user_id = event.user_id, "收到 OrderCompleted 事件");
        sink.record_completed(&event).await
    } else if msg.topic == topics.order_expired {
        let event: OrderExpiredEvent = msg.deserialize_payload()?;
        info!(order_id = event.order_id, user_id = event.user_id, "收到 OrderExpired 事件");
        sink.record_expired(&event).await
    } else {
        warn!(topic = %msg.topic, offset = msg.offset, "收到未订阅 topic 的消息，忽略");
        return Ok(());
    };

    match result {
        Ok(_) => Ok(()),
        Err(NotificationError::Shared(e)) => Err(e),
        Err(e) => {
            warn!(error = %e, topic = %msg.topic, offset = msg.offset, "通知事件无法处理，确认后丢弃");
            Ok(())
        }
    }
}
