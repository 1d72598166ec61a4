// orderly/examples/compensation.rs

use orderly::{
  BusinessBuilder, ChannelTransport, CompensationWorker, Forwarder, MemoryKeyValueStore, MemoryOrderStore, Order,
  OrderStatus, OrderType, OrderlyConfig, OrderlyError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

const SHIPPING: OrderType = OrderType(20);

#[tokio::main]
async fn main() -> Result<(), OrderlyError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
  info!("--- Orderly Compensation Example ---");

  // 1. Compensation on, with a short delay so the example finishes quickly.
  let config = OrderlyConfig {
    allow_mq_compensation: true,
    compensation_delay_secs: 1,
    compensation_retry_delay_secs: 1,
    ..OrderlyConfig::default()
  };
  let (transport, deliveries) = ChannelTransport::new();
  let forwarder = Arc::new(
    Forwarder::builder(config)
      .order_store(Arc::new(MemoryOrderStore::new()))
      .kv_store(Arc::new(MemoryKeyValueStore::new()))
      .transport(Arc::new(transport.clone()))
      .build()?,
  );

  let shipping = BusinessBuilder::<()>::new()
    .deliver(|order, _| async move {
      info!(order_id = %order.order_id, "Shipping label printed.");
      Ok(())
    })
    .on_finish(|order, _| async move {
      info!(order_id = %order.order_id, "Customer notified.");
      Ok(())
    })
    .build();
  forwarder.register_business(SHIPPING, shipping)?;

  // 2. The worker redelivers compensation messages until told to stop.
  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let worker = tokio::spawn(CompensationWorker::new(forwarder.clone(), transport, deliveries).run(shutdown_rx));

  // 3. Create an order with compensation, then "crash" before forwarding it.
  let order_id = forwarder.gen_oid(SHIPPING, "carol").await?;
  forwarder
    .create_order::<()>(&Order::new(order_id.clone(), SHIPPING, "carol"), None, true)
    .await?;
  info!(%order_id, "Order created; the caller never forwards it.");

  // 4. After the delay the worker forwards it on the caller's behalf.
  tokio::time::sleep(Duration::from_millis(1500)).await;
  let (_, _, status) = forwarder.get_order(&order_id, "carol").await?;
  info!(%status, "Status after compensation.");
  assert_eq!(status, OrderStatus::Finish);

  let _ = shutdown_tx.send(true);
  if let Err(e) = worker.await {
    tracing::error!(error = %e, "Compensation worker panicked.");
  }
  Ok(())
}
