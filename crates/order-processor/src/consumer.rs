//! OrderCreated 消费者
//!
//! 顺序消费 order-created topic，逐条交给 `OrderLifecycleProcessor`。
//! 处理结果映射为位点动作：成功与永久错误提交，瞬时故障回退重投，取消则退出。

use fulfillment_shared::config::AppConfig;
use fulfillment_shared::error::FulfillmentError;
use fulfillment_shared::events::OrderCreatedEvent;
use fulfillment_shared::kafka::{ConsumerMessage, KafkaConsumer};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::ProcessorError;
use crate::processor::{OrderLifecycleProcessor, ProcessOutcome};

/// 订单生命周期消费者
pub struct OrderCreatedConsumer {
    consumer: KafkaConsumer,
    processor: OrderLifecycleProcessor,
    topic: String,
    redelivery_backoff: Duration,
}

impl OrderCreatedConsumer {
    pub fn new(
        config: &AppConfig,
        processor: OrderLifecycleProcessor,
    ) -> Result<Self, ProcessorError> {
        let consumer = KafkaConsumer::new(&config.kafka, &config.kafka.processor_group)?;
        Ok(Self {
            consumer,
            processor,
            topic: config.kafka.topics.order_created.clone(),
            redelivery_backoff: config.pipeline.redelivery_backoff(),
        })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), ProcessorError> {
        self.consumer.subscribe(&[self.topic.as_str()])?;
        info!(topic = %self.topic, "订单生命周期处理器已启动");

        let processor = self.processor;
        let handler_shutdown = shutdown.clone();

        self.consumer
            .start(shutdown, self.redelivery_backoff, |msg| {
                let processor = &processor;
                let mut shutdown = handler_shutdown.clone();
                async move { handle_message(processor, &msg, &mut shutdown).await }
            })
            .await;

        info!("订单生命周期处理器已停止");
        Ok(())
    }
}

/// 处理单条 order-created 消息
///
/// 拆分为独立函数，便于在测试中直接调用而无需构造 Kafka 消费者。
/// 返回 `Ok` 表示可以提交位点；只有瞬时故障与取消以 `Err` 返回。
pub async fn handle_message(
    processor: &OrderLifecycleProcessor,
    msg: &ConsumerMessage,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), FulfillmentError> {
    let event: OrderCreatedEvent = msg.deserialize_payload()?;

    info!(
        order_id = event.order_id,
        user_id = event.user_id,
        partition = msg.partition,
        offset = msg.offset,
        "收到 OrderCreated 事件"
    );

    match processor.process(&event, shutdown).await {
        Ok(ProcessOutcome::Completed { published }) => {
            info!(order_id = event.order_id, published, "订单处理完成: Completed");
            Ok(())
        }
        Ok(ProcessOutcome::PaymentDeclined) => {
            info!(order_id = event.order_id, "订单处理完成: 支付失败");
            Ok(())
        }
        Ok(ProcessOutcome::Superseded) => {
            info!(order_id = event.order_id, "订单已被过期回收，跳过完成");
            Ok(())
        }
        Err(e) if e.is_permanent() => {
            warn!(order_id = event.order_id, error = %e, "跳过 OrderCreated 事件，确认消息");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
