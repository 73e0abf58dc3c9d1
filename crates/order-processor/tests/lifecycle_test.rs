//! 订单生命周期集成测试
//!
//! 以内存订单库和记录型发布器驱动 `handle_message`，覆盖完整的消息处理路径。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fulfillment_shared::error::FulfillmentError;
use fulfillment_shared::events::{OrderCompletedEvent, OrderCreatedEvent};
use fulfillment_shared::kafka::{ConsumerMessage, Disposition};
use fulfillment_shared::models::OrderStatus;
use fulfillment_shared::retry::RetryPolicy;
use fulfillment_shared::test_utils::{InMemoryStoreFactory, RecordingPublisher, TestDataGenerator};
use order_processor::{
    FixedPaymentOutcome, OrderLifecycleProcessor, PaymentOutcome, ProcessorSettings,
    handle_message,
};
use rust_decimal_macros::dec;
use tokio::sync::watch;

const COMPLETED_TOPIC: &str = "order-completed";

/// 在判定支付结果时执行任意动作，用于观察或篡改等待期间的状态
struct ScriptedPayment<F: Fn() -> bool + Send + Sync>(F);

impl<F: Fn() -> bool + Send + Sync> PaymentOutcome for ScriptedPayment<F> {
    fn decide_success(&self) -> bool {
        (self.0)()
    }
}

fn settings() -> ProcessorSettings {
    ProcessorSettings {
        completed_topic: COMPLETED_TOPIC.to_string(),
        payment_delay: Duration::from_millis(10),
        publish_policy: RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        },
    }
}

fn processor(
    stores: &InMemoryStoreFactory,
    publisher: &Arc<RecordingPublisher>,
    payment: Arc<dyn PaymentOutcome>,
) -> OrderLifecycleProcessor {
    OrderLifecycleProcessor::new(
        Arc::new(stores.clone()),
        publisher.clone(),
        payment,
        settings(),
    )
}

fn created_message(stores: &InMemoryStoreFactory, order_id: i32, offset: i64) -> ConsumerMessage {
    let order = stores.order(order_id).expect("fixture order");
    let event = OrderCreatedEvent::from_order(&order);
    ConsumerMessage {
        topic: "order-created".to_string(),
        partition: 0,
        offset,
        key: Some(order_id.to_string()),
        payload: serde_json::to_vec(&event).unwrap(),
        timestamp: None,
        headers: HashMap::new(),
    }
}

fn seed_single_item_order(stores: &InMemoryStoreFactory, order_id: i32) {
    stores.insert_order(TestDataGenerator::order_with_items(
        order_id,
        1,
        OrderStatus::Pending,
        &[("机械键盘", 2, dec!(50.00))],
    ));
}

#[tokio::test]
async fn test_successful_payment_completes_and_publishes_snapshot() {
    let stores = InMemoryStoreFactory::new();
    seed_single_item_order(&stores, 1);
    let publisher = Arc::new(RecordingPublisher::new());
    let processor = processor(&stores, &publisher, Arc::new(FixedPaymentOutcome(true)));

    let (_tx, mut rx) = watch::channel(false);
    let msg = created_message(&stores, 1, 0);
    let result = handle_message(&processor, &msg, &mut rx).await;

    assert!(result.is_ok());
    assert_eq!(stores.order_status(1), Some(OrderStatus::Completed));

    let messages = publisher.published_on(COMPLETED_TOPIC);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].key, "1");

    let events: Vec<OrderCompletedEvent> = publisher.events(COMPLETED_TOPIC);
    let event = &events[0];
    assert_eq!(event.total, dec!(100.00));
    assert_eq!(event.items.len(), 1);
    assert_eq!(event.items[0].product_name, "机械键盘");
    assert_eq!(event.items[0].quantity, 2);
    assert_eq!(event.items[0].price, dec!(50.00));

    let persisted = stores.order(1).unwrap();
    assert_eq!(event.total, persisted.total);
    assert_eq!(event.completed_at, persisted.updated_at);
}

#[tokio::test]
async fn test_failed_payment_stays_processing_and_acknowledges() {
    let stores = InMemoryStoreFactory::new();
    seed_single_item_order(&stores, 1);
    let publisher = Arc::new(RecordingPublisher::new());
    let processor = processor(&stores, &publisher, Arc::new(FixedPaymentOutcome(false)));

    let (_tx, mut rx) = watch::channel(false);
    let result = handle_message(&processor, &created_message(&stores, 1, 0), &mut rx).await;

    assert_eq!(Disposition::from_result(&result), Disposition::Commit);
    assert_eq!(stores.order_status(1), Some(OrderStatus::Processing));
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn test_redelivery_of_completed_order_never_republishes() {
    let stores = InMemoryStoreFactory::new();
    seed_single_item_order(&stores, 1);
    let publisher = Arc::new(RecordingPublisher::new());
    let processor = processor(&stores, &publisher, Arc::new(FixedPaymentOutcome(true)));

    let (_tx, mut rx) = watch::channel(false);
    let msg = created_message(&stores, 1, 0);

    handle_message(&processor, &msg, &mut rx).await.unwrap();
    let first_update = stores.order(1).unwrap().updated_at;

    // 同一条消息再次投递
    let result = handle_message(&processor, &msg, &mut rx).await;

    assert_eq!(Disposition::from_result(&result), Disposition::Commit);
    assert_eq!(publisher.published_on(COMPLETED_TOPIC).len(), 1);
    assert_eq!(stores.order_status(1), Some(OrderStatus::Completed));
    assert_eq!(stores.order(1).unwrap().updated_at, first_update);
}

#[tokio::test]
async fn test_redelivery_while_processing_is_safe() {
    let stores = InMemoryStoreFactory::new();
    seed_single_item_order(&stores, 1);
    let publisher = Arc::new(RecordingPublisher::new());
    let processor = processor(&stores, &publisher, Arc::new(FixedPaymentOutcome(false)));

    let (_tx, mut rx) = watch::channel(false);
    let msg = created_message(&stores, 1, 0);

    handle_message(&processor, &msg, &mut rx).await.unwrap();
    handle_message(&processor, &msg, &mut rx).await.unwrap();

    assert_eq!(stores.order_status(1), Some(OrderStatus::Processing));
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn test_missing_order_is_acknowledged() {
    let stores = InMemoryStoreFactory::new();
    seed_single_item_order(&stores, 1);
    let msg = created_message(&stores, 1, 0);

    let empty = InMemoryStoreFactory::new();
    let publisher = Arc::new(RecordingPublisher::new());
    let processor = processor(&empty, &publisher, Arc::new(FixedPaymentOutcome(true)));

    let (_tx, mut rx) = watch::channel(false);
    let result = handle_message(&processor, &msg, &mut rx).await;

    assert_eq!(Disposition::from_result(&result), Disposition::Commit);
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_permanent() {
    let stores = InMemoryStoreFactory::new();
    let publisher = Arc::new(RecordingPublisher::new());
    let processor = processor(&stores, &publisher, Arc::new(FixedPaymentOutcome(true)));

    let msg = ConsumerMessage {
        topic: "order-created".to_string(),
        partition: 0,
        offset: 3,
        key: None,
        payload: b"{\"OrderId\":".to_vec(),
        timestamp: None,
        headers: HashMap::new(),
    };

    let (_tx, mut rx) = watch::channel(false);
    let result = handle_message(&processor, &msg, &mut rx).await;

    assert!(matches!(result, Err(FulfillmentError::InvalidPayload(_))));
    assert_eq!(Disposition::from_result(&result), Disposition::Commit);
}

#[tokio::test]
async fn test_transient_store_fault_requests_redelivery() {
    let stores = InMemoryStoreFactory::new();
    seed_single_item_order(&stores, 1);
    let publisher = Arc::new(RecordingPublisher::new());
    let processor = processor(&stores, &publisher, Arc::new(FixedPaymentOutcome(true)));

    let (_tx, mut rx) = watch::channel(false);
    let msg = created_message(&stores, 1, 0);

    stores.fail_next(1);
    let result = handle_message(&processor, &msg, &mut rx).await;
    assert_eq!(Disposition::from_result(&result), Disposition::Redeliver);
    assert_eq!(stores.order_status(1), Some(OrderStatus::Pending));

    // 重投后正常完成
    handle_message(&processor, &msg, &mut rx).await.unwrap();
    assert_eq!(stores.order_status(1), Some(OrderStatus::Completed));
    assert_eq!(publisher.published_on(COMPLETED_TOPIC).len(), 1);
}

#[tokio::test]
async fn test_store_handle_released_during_payment_wait() {
    let stores = InMemoryStoreFactory::new();
    seed_single_item_order(&stores, 1);
    let publisher = Arc::new(RecordingPublisher::new());

    let observed = stores.clone();
    let payment = ScriptedPayment(move || {
        assert_eq!(observed.active_handles(), 0);
        assert_eq!(observed.order_status(1), Some(OrderStatus::Processing));
        true
    });
    let processor = processor(&stores, &publisher, Arc::new(payment));

    let (_tx, mut rx) = watch::channel(false);
    handle_message(&processor, &created_message(&stores, 1, 0), &mut rx)
        .await
        .unwrap();

    assert_eq!(stores.active_handles(), 0);
    assert_eq!(stores.opened_handles(), 2);
}

#[tokio::test]
async fn test_watchdog_wins_race_no_completion_event() {
    let stores = InMemoryStoreFactory::new();
    seed_single_item_order(&stores, 1);
    let publisher = Arc::new(RecordingPublisher::new());

    // 支付等待期间订单被过期巡检回收
    let racing = stores.clone();
    let payment = ScriptedPayment(move || {
        racing.force_status(1, OrderStatus::Expired, chrono::Utc::now());
        true
    });
    let processor = processor(&stores, &publisher, Arc::new(payment));

    let (_tx, mut rx) = watch::channel(false);
    let result = handle_message(&processor, &created_message(&stores, 1, 0), &mut rx).await;

    assert!(result.is_ok());
    assert_eq!(stores.order_status(1), Some(OrderStatus::Expired));
    assert!(publisher.published_on(COMPLETED_TOPIC).is_empty());
}

#[tokio::test]
async fn test_publish_failure_after_completion_is_logged_not_redelivered() {
    let stores = InMemoryStoreFactory::new();
    seed_single_item_order(&stores, 1);
    let publisher = Arc::new(RecordingPublisher::failing());
    let processor = processor(&stores, &publisher, Arc::new(FixedPaymentOutcome(true)));

    let (_tx, mut rx) = watch::channel(false);
    let result = handle_message(&processor, &created_message(&stores, 1, 0), &mut rx).await;

    assert_eq!(Disposition::from_result(&result), Disposition::Commit);
    assert_eq!(stores.order_status(1), Some(OrderStatus::Completed));
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn test_transient_publish_failure_is_retried() {
    let stores = InMemoryStoreFactory::new();
    seed_single_item_order(&stores, 1);
    let publisher = Arc::new(RecordingPublisher::new());
    publisher.fail_next(2);
    let processor = processor(&stores, &publisher, Arc::new(FixedPaymentOutcome(true)));

    let (_tx, mut rx) = watch::channel(false);
    handle_message(&processor, &created_message(&stores, 1, 0), &mut rx)
        .await
        .unwrap();

    assert_eq!(publisher.published_on(COMPLETED_TOPIC).len(), 1);
}

#[tokio::test]
async fn test_shutdown_leaves_offset_uncommitted() {
    let stores = InMemoryStoreFactory::new();
    seed_single_item_order(&stores, 1);
    let publisher = Arc::new(RecordingPublisher::new());
    let processor = OrderLifecycleProcessor::new(
        Arc::new(stores.clone()),
        publisher.clone(),
        Arc::new(FixedPaymentOutcome(true)),
        ProcessorSettings {
            payment_delay: Duration::from_secs(30),
            ..settings()
        },
    );

    let (tx, mut rx) = watch::channel(false);
    tx.send(true).unwrap();

    let result = handle_message(&processor, &created_message(&stores, 1, 0), &mut rx).await;

    assert_eq!(Disposition::from_result(&result), Disposition::Stop);
    assert_eq!(stores.order_status(1), Some(OrderStatus::Processing));
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn test_same_key_messages_processed_in_order() {
    let stores = InMemoryStoreFactory::new();
    seed_single_item_order(&stores, 1);
    seed_single_item_order(&stores, 2);
    let publisher = Arc::new(RecordingPublisher::new());
    let processor = processor(&stores, &publisher, Arc::new(FixedPaymentOutcome(true)));

    let (_tx, mut rx) = watch::channel(false);
    for (offset, order_id) in [(0, 2), (1, 1)] {
        handle_message(&processor, &created_message(&stores, order_id, offset), &mut rx)
            .await
            .unwrap();
    }

    let order_ids: Vec<i32> = publisher
        .events::<OrderCompletedEvent>(COMPLETED_TOPIC)
        .iter()
        .map(|e| e.order_id)
        .collect();
    assert_eq!(order_ids, vec![2, 1]);
}
