//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一消息序列化、错误映射、手动位点提交和优雅关闭语义。

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Offset, TopicPartitionList};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::FulfillmentError;
use crate::observability::metrics;
use crate::publisher::{DeliveryReceipt, EventPublisher};

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// 默认 topic 名称，可通过 `kafka.topics` 配置覆盖
pub mod topics {
    pub const ORDER_CREATED: &str = "order-created";
    pub const ORDER_COMPLETED: &str = "order-completed";
    pub const ORDER_EXPIRED: &str = "order-expired";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }

    /// 将 JSON 格式负载反序列化为目标类型
    ///
    /// 负载损坏属于永久错误，重投不会改变结果。
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, FulfillmentError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| FulfillmentError::InvalidPayload(format!("负载反序列化失败: {e}")))
    }
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 开启幂等发送并要求全部副本确认；`FutureProducer` 本身是 Arc 包装的，可直接 Clone。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, FulfillmentError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "5")
            .set(
                "message.send.max.retries",
                config.producer.message_send_max_retries.to_string(),
            )
            .set(
                "message.timeout.ms",
                config.producer.message_timeout_ms.to_string(),
            )
            .create()
            .map_err(|e| FulfillmentError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            client_id = %config.client_id,
            "Kafka 生产者已初始化"
        );
        Ok(Self {
            producer,
            delivery_timeout: Duration::from_millis(config.producer.message_timeout_ms),
        })
    }

    /// 等待缓冲中的消息全部发出，超时后放弃
    pub fn flush(&self, timeout: Duration) -> Result<(), FulfillmentError> {
        self.producer
            .flush(timeout)
            .map_err(|e| FulfillmentError::Kafka(format!("刷新生产者缓冲失败: {e}")))?;
        info!(timeout_ms = timeout.as_millis() as u64, "Kafka 生产者缓冲已刷出");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for KafkaProducer {
    async fn publish_bytes(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Result<DeliveryReceipt, FulfillmentError> {
        let record = FutureRecord::to(topic).key(key).payload(&payload);

        let delivery = self
            .producer
            .send(record, self.delivery_timeout)
            .await
            .map_err(|(e, _)| FulfillmentError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );

        Ok(DeliveryReceipt {
            topic: topic.to_string(),
            partition: delivery.partition,
            offset: delivery.offset,
        })
    }
}

// ---------------------------------------------------------------------------
// 消息处置
// ---------------------------------------------------------------------------

/// 处理结果对应的位点动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 提交位点，消息视为已处理（含永久错误后的丢弃）
    Commit,
    /// 不提交位点，回退到该消息重新投递
    Redeliver,
    /// 关闭信号中止了处理，不提交并退出循环
    Stop,
}

impl Disposition {
    pub fn from_result(result: &Result<(), FulfillmentError>) -> Self {
        match result {
            Ok(()) => Self::Commit,
            Err(e) if e.is_cancelled() => Self::Stop,
            Err(e) if e.is_retryable() => Self::Redeliver,
            Err(_) => Self::Commit,
        }
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 消费者
///
/// 关闭自动提交，由消费循环在处理成功后逐条提交位点，
/// 实现至少一次投递语义。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    group_id: String,
}

impl KafkaConsumer {
    pub fn new(config: &KafkaConfig, group_id: &str) -> Result<Self, FulfillmentError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("group.id", group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .create()
            .map_err(|e| FulfillmentError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self {
            consumer,
            group_id: group_id.to_string(),
        })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), FulfillmentError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| FulfillmentError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, group_id = %self.group_id, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环
    ///
    /// 每次只处理一条消息，处理完再拉取下一条，同一 key 的消息因此按发布顺序处理。
    /// - handler 成功：提交位点
    /// - 可重试错误：不提交，回退到该位点并在退避后重新消费
    /// - 永久错误：记录日志后提交位点丢弃
    /// - 取消：不提交，退出循环
    ///
    /// 关闭信号只在拉取消息时抢占，正在执行的 handler 自行决定完成或中止。
    pub async fn start<F, Fut>(
        self,
        mut shutdown: watch::Receiver<bool>,
        redelivery_backoff: Duration,
        handler: F,
    ) where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: Future<Output = Result<(), FulfillmentError>>,
    {
        info!(group_id = %self.group_id, "Kafka 消费循环已启动");

        loop {
            if *shutdown.borrow() {
                info!(group_id = %self.group_id, "收到关闭信号，Kafka 消费循环退出");
                break;
            }

            let msg = tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(group_id = %self.group_id, "收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                    continue;
                }

                received = self.consumer.recv() => match received {
                    Ok(borrowed) => ConsumerMessage::from_borrowed(&borrowed),
                    Err(e) => {
                        error!(error = %e, group_id = %self.group_id, "接收 Kafka 消息出错");
                        continue;
                    }
                },
            };

            let (topic, partition, offset) = (msg.topic.clone(), msg.partition, msg.offset);
            debug!(topic = %topic, partition, offset, key = ?msg.key, "收到 Kafka 消息");

            let result = handler(msg).await;
            let disposition = Disposition::from_result(&result);
            metrics::record_consumed(&topic, disposition);

            match disposition {
                Disposition::Commit => {
                    if let Err(e) = &result {
                        error!(
                            error = %e,
                            code = e.code(),
                            topic = %topic,
                            partition,
                            offset,
                            "消息无法处理且不可重试，确认后丢弃"
                        );
                    }
                    self.commit(&topic, partition, offset);
                }
                Disposition::Redeliver => {
                    if let Err(e) = &result {
                        warn!(
                            error = %e,
                            topic = %topic,
                            partition,
                            offset,
                            backoff_ms = redelivery_backoff.as_millis() as u64,
                            "消息处理遇到瞬时故障，位点未提交，退避后重新投递"
                        );
                    }
                    self.rewind(&topic, partition, offset);

                    tokio::select! {
                        _ = tokio::time::sleep(redelivery_backoff) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Disposition::Stop => {
                    info!(
                        topic = %topic,
                        partition,
                        offset,
                        "处理被关闭信号中止，位点未提交，重启后将重新投递"
                    );
                    break;
                }
            }
        }
    }

    /// 提交 `offset + 1`，表示该消息及之前的消息均已处理
    fn commit(&self, topic: &str, partition: i32, offset: i64) {
        let mut tpl = TopicPartitionList::new();
        let result = tpl
            .add_partition_offset(topic, partition, Offset::Offset(offset + 1))
            .and_then(|_| self.consumer.commit(&tpl, CommitMode::Sync));

        match result {
            Ok(()) => debug!(topic, partition, offset, "位点已提交"),
            // 提交失败只会导致重复投递，由 handler 的幂等性兜底
            Err(e) => error!(error = %e, topic, partition, offset, "提交位点失败"),
        }
    }

    /// 将分区读取位置回退到未提交的消息，使其被再次消费
    fn rewind(&self, topic: &str, partition: i32, offset: i64) {
        if let Err(e) =
            self.consumer
                .seek(topic, partition, Offset::Offset(offset), Duration::from_secs(5))
        {
            error!(error = %e, topic, partition, offset, "回退消费位置失败，等待重平衡或重启后重投");
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_message(payload: &[u8]) -> ConsumerMessage {
        ConsumerMessage {
            topic: topics::ORDER_CREATED.to_string(),
            partition: 0,
            offset: 42,
            key: Some("1".to_string()),
            payload: payload.to_vec(),
            timestamp: Some(1_700_000_000_000),
            headers: HashMap::new(),
        }
    }

    #[test]
    fn test_topic_constants() {
        assert_eq!(topics::ORDER_CREATED, "order-created");
        assert_eq!(topics::ORDER_COMPLETED, "order-completed");
        assert_eq!(topics::ORDER_EXPIRED, "order-expired");
    }

    #[test]
    fn test_consumer_message_deserialize() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        #[serde(rename_all = "PascalCase")]
        struct Payload {
            order_id: i32,
        }

        let msg = make_message(br#"{"OrderId":1}"#);
        let payload: Payload = msg.deserialize_payload().unwrap();
        assert_eq!(payload, Payload { order_id: 1 });
    }

    #[test]
    fn test_consumer_message_deserialize_invalid_json_is_permanent() {
        let msg = make_message(b"not json");
        let err = msg.deserialize_payload::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidPayload(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_disposition_from_result() {
        assert_eq!(Disposition::from_result(&Ok(())), Disposition::Commit);
        assert_eq!(
            Disposition::from_result(&Err(FulfillmentError::Store("连接池耗尽".to_string()))),
            Disposition::Redeliver
        );
        assert_eq!(
            Disposition::from_result(&Err(FulfillmentError::Kafka("超时".to_string()))),
            Disposition::Redeliver
        );
        assert_eq!(
            Disposition::from_result(&Err(FulfillmentError::InvalidPayload("坏消息".to_string()))),
            Disposition::Commit
        );
        assert_eq!(
            Disposition::from_result(&Err(FulfillmentError::Cancelled)),
            Disposition::Stop
        );
    }
}
