// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use async_trait::async_trait;
use orderly::{
  ChannelTransport, Delivery, Forwarder, MemoryKeyValueStore, MemoryOrderStore, Order, OrderBusiness, OrderStatus,
  OrderType, OrderlyConfig,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::Level;

pub const VOUCHER_ORDER: OrderType = OrderType(1);
pub const PLAIN_ORDER: OrderType = OrderType(2);

// --- Extension used by the recording business ---
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
  pub code: String,
  pub deliveries: u32,
}

// --- Business that records every callback ---
#[derive(Default)]
pub struct RecordingBusiness {
  pub calls: Mutex<Vec<String>>,
  pub cancel_cause: Mutex<Option<String>>,
  pub fail_deliver: Mutex<Option<String>>,
  pub deliver_count: AtomicUsize,
  pub finish_count: AtomicUsize,
  pub abnormal: Mutex<Vec<OrderStatus>>,
  /// Extension seen by the last on_finish.
  pub finished_with: Mutex<Option<Voucher>>,
}

impl RecordingBusiness {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn cancelling(cause: &str) -> Arc<Self> {
    let b = Self::default();
    *b.cancel_cause.lock() = Some(cause.to_string());
    Arc::new(b)
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().clone()
  }

  pub fn deliveries(&self) -> usize {
    self.deliver_count.load(Ordering::SeqCst)
  }

  pub fn finishes(&self) -> usize {
    self.finish_count.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl OrderBusiness for RecordingBusiness {
  type Extension = Voucher;

  fn new_extension(&self) -> Option<Voucher> {
    Some(Voucher::default())
  }

  async fn can_forward(&self, _order: &Order, _ext: Option<&mut Voucher>) -> anyhow::Result<Option<String>> {
    self.calls.lock().push("can_forward".to_string());
    Ok(self.cancel_cause.lock().clone())
  }

  async fn deliver(&self, _order: &Order, ext: Option<&mut Voucher>) -> anyhow::Result<()> {
    self.calls.lock().push("deliver".to_string());
    if let Some(msg) = self.fail_deliver.lock().clone() {
      anyhow::bail!(msg);
    }
    if let Some(voucher) = ext {
      voucher.deliveries += 1;
    }
    self.deliver_count.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn on_abnormal(&self, _order: &Order, _ext: Option<&mut Voucher>, status: OrderStatus) -> anyhow::Result<()> {
    self.calls.lock().push(format!("on_abnormal:{}", status.code()));
    self.abnormal.lock().push(status);
    Ok(())
  }

  async fn on_finish(&self, _order: &Order, ext: Option<&mut Voucher>) -> anyhow::Result<()> {
    self.calls.lock().push("on_finish".to_string());
    *self.finished_with.lock() = ext.cloned();
    self.finish_count.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

// --- Forwarder over in-memory collaborators ---
pub struct Harness {
  pub forwarder: Arc<Forwarder>,
  pub orders: Arc<MemoryOrderStore>,
  pub kv: Arc<MemoryKeyValueStore>,
  pub transport: ChannelTransport,
  pub deliveries: UnboundedReceiver<Delivery>,
}

pub fn config(allow_compensation: bool) -> OrderlyConfig {
  OrderlyConfig {
    allow_mq_compensation: allow_compensation,
    ..OrderlyConfig::default()
  }
}

pub fn harness(config: OrderlyConfig) -> Harness {
  let orders = Arc::new(MemoryOrderStore::new());
  let kv = Arc::new(MemoryKeyValueStore::new());
  let (transport, deliveries) = ChannelTransport::new();
  let forwarder = Forwarder::builder(config)
    .order_store(orders.clone())
    .kv_store(kv.clone())
    .transport(Arc::new(transport.clone()))
    .build()
    .expect("forwarder builds");
  Harness {
    forwarder: Arc::new(forwarder),
    orders,
    kv,
    transport,
    deliveries,
  }
}

/// Harness with a `RecordingBusiness` registered for `VOUCHER_ORDER`.
pub fn harness_with(business: Arc<RecordingBusiness>, allow_compensation: bool) -> Harness {
  let h = harness(config(allow_compensation));
  h.forwarder
    .register_business(VOUCHER_ORDER, business)
    .expect("register business");
  h
}

pub fn voucher_order(order_id: &str) -> Order {
  Order::new(order_id, VOUCHER_ORDER, "user-1")
}

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}
