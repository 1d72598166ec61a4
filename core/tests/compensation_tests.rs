// tests/compensation_tests.rs
mod common;

use common::*;
use orderly::compensation::encode_message;
use orderly::{
  CompensationConsumer, CompensationMessage, CompensationWorker, ForwarderBuilder, KeyValueStore, MemoryKeyValueStore,
  MemoryOrderStore, OrderStatus, OrderlyConfig, OrderlyError,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;

#[tokio::test]
async fn test_compensation_requested_but_disabled_creates_nothing() {
  setup_tracing();
  let h = harness_with(RecordingBusiness::new(), false);
  let res = h
    .forwarder
    .create_order::<Voucher>(&voucher_order("o-nocomp"), None, true)
    .await;
  assert!(matches!(res, Err(OrderlyError::CompensationDisabled { .. })));
  assert!(h.orders.is_empty());

  let signal = h.forwarder.send_compensation_signal("o-nocomp", "user-1").await;
  assert!(matches!(signal, Err(OrderlyError::CompensationDisabled { .. })));
}

#[test]
fn test_builder_requires_transport_when_compensation_allowed() {
  let res = ForwarderBuilder::new(config(true))
    .order_store(Arc::new(MemoryOrderStore::new()))
    .kv_store(Arc::new(MemoryKeyValueStore::new()))
    .build();
  assert!(matches!(res, Err(OrderlyError::Configuration(_))));
}

#[tokio::test(start_paused = true)]
async fn test_create_order_publishes_delayed_message() {
  setup_tracing();
  let mut h = harness_with(RecordingBusiness::new(), true);
  h.forwarder
    .create_order::<Voucher>(&voucher_order("o-comp"), None, true)
    .await
    .unwrap();

  let start = tokio::time::Instant::now();
  let delivery = h.deliveries.recv().await.unwrap();
  assert!(start.elapsed() >= Duration::from_secs(60));
  assert_eq!(delivery.attempt, 1);
  let message: CompensationMessage = serde_json::from_slice(&delivery.payload).unwrap();
  assert_eq!(
    message,
    CompensationMessage {
      order_id: "o-comp".to_string(),
      owner_id: "user-1".to_string(),
    }
  );
}

#[tokio::test]
async fn test_consumer_forwards_abandoned_order() {
  setup_tracing();
  let business = RecordingBusiness::new();
  let h = harness_with(business.clone(), true);
  // Created with compensation, but the creator never called forward.
  h.forwarder
    .create_order::<Voucher>(&voucher_order("o-abandoned"), None, true)
    .await
    .unwrap();

  let consumer = CompensationConsumer::new(h.forwarder.clone());
  let payload = encode_message("o-abandoned", "user-1").unwrap();
  consumer.consume(&payload, SystemTime::now()).await.unwrap();
  assert_eq!(h.orders.record("o-abandoned").unwrap().order_status, OrderStatus::Finish);

  // Duplicate deliveries are acknowledged and do not deliver twice.
  consumer.consume(&payload, SystemTime::now()).await.unwrap();
  assert_eq!(business.deliveries(), 1);
  assert_eq!(business.finishes(), 2);
}

#[tokio::test]
async fn test_consumer_acknowledges_what_it_cannot_or_need_not_handle() {
  setup_tracing();
  let business = RecordingBusiness::cancelling("expired promotion");
  let h = harness_with(business.clone(), true);
  let consumer = CompensationConsumer::new(h.forwarder.clone());

  consumer.consume(b"not json", SystemTime::now()).await.unwrap();
  consumer.consume(br#"{"order_id":""}"#, SystemTime::now()).await.unwrap();
  consumer.consume(b"{}", SystemTime::now()).await.unwrap();

  let missing = encode_message("o-gone", "user-1").unwrap();
  consumer.consume(&missing, SystemTime::now()).await.unwrap();

  h.forwarder
    .create_order::<Voucher>(&voucher_order("o-vetoed"), None, false)
    .await
    .unwrap();
  let vetoed = encode_message("o-vetoed", "user-1").unwrap();
  consumer.consume(&vetoed, SystemTime::now()).await.unwrap();
  assert_eq!(
    h.orders.record("o-vetoed").unwrap().order_status,
    OrderStatus::BusinessCancelForward
  );
}

#[tokio::test]
async fn test_consumer_asks_for_retry_when_order_is_locked() {
  setup_tracing();
  let h = harness_with(RecordingBusiness::new(), true);
  h.forwarder
    .create_order::<Voucher>(&voucher_order("o-busy"), None, false)
    .await
    .unwrap();
  let key = h.forwarder.config().order_lock_key("o-busy");
  h.kv.set_nx(&key, Duration::from_secs(30)).await.unwrap();

  let consumer = CompensationConsumer::new(h.forwarder.clone());
  let payload = encode_message("o-busy", "user-1").unwrap();
  let err = consumer.consume(&payload, SystemTime::now()).await.unwrap_err();
  assert!(matches!(err, OrderlyError::LockUnavailable { .. }));
}

#[tokio::test]
async fn test_consumer_drops_messages_past_max_lifetime() {
  setup_tracing();
  let business = RecordingBusiness::new();
  let h = harness(OrderlyConfig {
    allow_mq_compensation: true,
    compensation_max_lifetime_secs: 600,
    ..OrderlyConfig::default()
  });
  h.forwarder.register_business(VOUCHER_ORDER, business.clone()).unwrap();
  h.forwarder
    .create_order::<Voucher>(&voucher_order("o-old"), None, false)
    .await
    .unwrap();

  let consumer = CompensationConsumer::new(h.forwarder.clone());
  let payload = encode_message("o-old", "user-1").unwrap();
  let long_ago = SystemTime::now() - Duration::from_secs(3600);
  consumer.consume(&payload, long_ago).await.unwrap();
  assert_eq!(h.orders.record("o-old").unwrap().order_status, OrderStatus::Forwarding);
  assert_eq!(business.deliveries(), 0);

  let recent = SystemTime::now() - Duration::from_secs(60);
  consumer.consume(&payload, recent).await.unwrap();
  assert_eq!(h.orders.record("o-old").unwrap().order_status, OrderStatus::Finish);
}

#[tokio::test(start_paused = true)]
async fn test_worker_retries_until_order_is_forwarded() {
  setup_tracing();
  let business = RecordingBusiness::new();
  let h = harness_with(business.clone(), true);
  let Harness {
    forwarder,
    orders,
    kv,
    transport,
    deliveries,
  } = h;

  forwarder
    .create_order::<Voucher>(&voucher_order("o-worker"), None, true)
    .await
    .unwrap();
  // Someone else holds the lock when the message first arrives at t=60s;
  // it expires at t=62s, before the retry at t=65s.
  let key = forwarder.config().order_lock_key("o-worker");
  kv.set_nx(&key, Duration::from_secs(62)).await.unwrap();

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let worker = CompensationWorker::new(forwarder.clone(), transport, deliveries);
  let handle = tokio::spawn(worker.run(shutdown_rx));

  tokio::time::sleep(Duration::from_secs(61)).await;
  assert_eq!(orders.record("o-worker").unwrap().order_status, OrderStatus::Forwarding);

  tokio::time::sleep(Duration::from_secs(10)).await;
  assert_eq!(orders.record("o-worker").unwrap().order_status, OrderStatus::Finish);
  assert_eq!(business.deliveries(), 1);

  shutdown_tx.send(true).unwrap();
  handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_worker_slow_order_does_not_hold_back_others() {
  setup_tracing();
  let h = harness(config(true));
  let business = orderly::BusinessBuilder::<()>::new()
    .deliver(|order, _| async move {
      if order.order_id == "o-slow" {
        tokio::time::sleep(Duration::from_secs(25)).await;
      }
      Ok(())
    })
    .build();
  h.forwarder.register_business(PLAIN_ORDER, business).unwrap();
  let Harness {
    forwarder,
    orders,
    transport,
    deliveries,
    ..
  } = h;

  for order_id in ["o-slow", "o-fast"] {
    let order = orderly::Order::new(order_id, PLAIN_ORDER, "user-1");
    forwarder.create_order::<()>(&order, None, true).await.unwrap();
  }

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let worker = CompensationWorker::new(forwarder.clone(), transport, deliveries);
  let handle = tokio::spawn(worker.run(shutdown_rx));

  tokio::time::sleep(Duration::from_secs(65)).await;
  assert_eq!(orders.record("o-fast").unwrap().order_status, OrderStatus::Finish);
  assert_eq!(orders.record("o-slow").unwrap().order_status, OrderStatus::Forwarding);

  tokio::time::sleep(Duration::from_secs(25)).await;
  assert_eq!(orders.record("o-slow").unwrap().order_status, OrderStatus::Finish);

  shutdown_tx.send(true).unwrap();
  handle.await.unwrap();
}
