// orderly/src/store/memory.rs

//! In-process implementations of the store traits.
//!
//! They keep the same contracts as the networked backends (unique order ids,
//! affected-row counts, key expiry, delayed delivery) so the engine behaves the
//! same way in tests, demos and single-node deployments.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{event, Level};

use crate::core::model::{OrderRecord, PayStatus};
use crate::error::{OrderlyError, OrderlyResult};
use crate::store::{CompensationTransport, KeyValueStore, OrderStore, PaymentKey, StatusChange};

// --- Order rows ---

/// Order rows grouped by partition name, keyed by order id inside a partition.
#[derive(Default)]
pub struct MemoryOrderStore {
  tables: RwLock<HashMap<String, HashMap<String, OrderRecord>>>,
  next_id: AtomicU64,
  fail_on_write: AtomicBool,
}

impl MemoryOrderStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Makes every following insert/update fail with a storage error until reset.
  pub fn set_fail_on_write(&self, fail: bool) {
    self.fail_on_write.store(fail, Ordering::SeqCst);
  }

  /// Looks an order up in any partition.
  pub fn record(&self, order_id: &str) -> Option<OrderRecord> {
    self
      .tables
      .read()
      .values()
      .find_map(|rows| rows.get(order_id).cloned())
  }

  /// Removes an order from whichever partition holds it.
  pub fn remove(&self, order_id: &str) -> Option<OrderRecord> {
    self
      .tables
      .write()
      .values_mut()
      .find_map(|rows| rows.remove(order_id))
  }

  /// Names of the partitions that hold at least one row, sorted.
  pub fn tables(&self) -> Vec<String> {
    let mut names: Vec<String> = self
      .tables
      .read()
      .iter()
      .filter(|(_, rows)| !rows.is_empty())
      .map(|(name, _)| name.clone())
      .collect();
    names.sort();
    names
  }

  pub fn len(&self) -> usize {
    self.tables.read().values().map(HashMap::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn check_write(&self) -> OrderlyResult<()> {
    if self.fail_on_write.load(Ordering::SeqCst) {
      return Err(OrderlyError::storage(anyhow!("memory order store: write failure injected")));
    }
    Ok(())
  }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
  async fn insert(&self, table: &str, mut record: OrderRecord) -> OrderlyResult<u64> {
    self.check_write()?;
    let mut tables = self.tables.write();
    let rows = tables.entry(table.to_string()).or_default();
    if rows.contains_key(&record.order_id) {
      return Err(OrderlyError::AlreadyExists {
        order_id: record.order_id,
      });
    }
    let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    record.id = id;
    rows.insert(record.order_id.clone(), record);
    Ok(id)
  }

  async fn find(&self, table: &str, order_id: &str, owner_id: &str) -> OrderlyResult<Option<OrderRecord>> {
    Ok(
      self
        .tables
        .read()
        .get(table)
        .and_then(|rows| rows.get(order_id))
        .filter(|record| record.owner_id == owner_id)
        .cloned(),
    )
  }

  async fn update_status(&self, table: &str, change: StatusChange<'_>) -> OrderlyResult<u64> {
    self.check_write()?;
    let mut tables = self.tables.write();
    let Some(record) = tables
      .get_mut(table)
      .and_then(|rows| rows.get_mut(change.order_id))
      .filter(|record| record.owner_id == change.owner_id)
    else {
      return Ok(0);
    };
    record.order_status = change.status;
    if let Some(extension) = change.extension {
      record.extension = extension.to_string();
    }
    record.remark = change.remark.to_string();
    record.update_count += 1;
    record.updated_at = Utc::now();
    Ok(1)
  }

  async fn update_pay_status(
    &self,
    table: &str,
    owner_id: &str,
    key: &PaymentKey,
    pay_status: PayStatus,
    remark: &str,
  ) -> OrderlyResult<u64> {
    self.check_write()?;
    let mut tables = self.tables.write();
    let Some(rows) = tables.get_mut(table) else {
      return Ok(0);
    };
    let record = match key {
      PaymentKey::OrderId(order_id) => rows.get_mut(order_id).filter(|r| r.owner_id == owner_id),
      PaymentKey::ThirdPartyOrderId(third) => rows
        .values_mut()
        .find(|r| r.owner_id == owner_id && &r.third_pay_order_id == third),
    };
    let Some(record) = record else {
      return Ok(0);
    };
    record.pay_status = pay_status;
    record.remark = remark.to_string();
    record.update_count += 1;
    record.updated_at = Utc::now();
    Ok(1)
  }
}

// --- Keys with expiry ---

struct KvEntry {
  value: i64,
  expires_at: Option<Instant>,
}

impl KvEntry {
  fn is_live(&self, now: Instant) -> bool {
    self.expires_at.map_or(true, |at| now < at)
  }
}

/// Keys with optional expiry. Time is `tokio::time::Instant`, so paused test clocks apply.
#[derive(Default)]
pub struct MemoryKeyValueStore {
  entries: Mutex<HashMap<String, KvEntry>>,
}

impl MemoryKeyValueStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Whether `key` exists and has not expired.
  pub fn contains(&self, key: &str) -> bool {
    let now = Instant::now();
    self.entries.lock().get(key).is_some_and(|e| e.is_live(now))
  }

  pub fn value(&self, key: &str) -> Option<i64> {
    let now = Instant::now();
    self
      .entries
      .lock()
      .get(key)
      .filter(|e| e.is_live(now))
      .map(|e| e.value)
  }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
  async fn set_nx(&self, key: &str, ttl: Duration) -> OrderlyResult<bool> {
    let now = Instant::now();
    let mut entries = self.entries.lock();
    if entries.get(key).is_some_and(|e| e.is_live(now)) {
      return Ok(false);
    }
    entries.insert(
      key.to_string(),
      KvEntry {
        value: 1,
        expires_at: Some(now + ttl),
      },
    );
    Ok(true)
  }

  async fn delete(&self, key: &str) -> OrderlyResult<()> {
    self.entries.lock().remove(key);
    Ok(())
  }

  async fn incr_by(&self, key: &str, delta: i64) -> OrderlyResult<i64> {
    let now = Instant::now();
    let mut entries = self.entries.lock();
    let entry = entries.entry(key.to_string()).or_insert(KvEntry {
      value: 0,
      expires_at: None,
    });
    if !entry.is_live(now) {
      entry.value = 0;
      entry.expires_at = None;
    }
    entry.value = entry
      .value
      .checked_add(delta)
      .ok_or_else(|| OrderlyError::key_value(anyhow!("counter '{}' overflowed", key)))?;
    Ok(entry.value)
  }
}

// --- Delayed delivery ---

/// One delivery of a compensation message.
#[derive(Debug, Clone)]
pub struct Delivery {
  pub payload: Vec<u8>,
  /// Time of the first publish; kept across redeliveries.
  pub published_at: SystemTime,
  /// 1 for the first delivery.
  pub attempt: u32,
}

impl Delivery {
  pub fn new(payload: Vec<u8>) -> Self {
    Self {
      payload,
      published_at: SystemTime::now(),
      attempt: 1,
    }
  }
}

/// In-process delayed queue. `send` parks each message on a timer task and hands it
/// to the receiver once its delay has passed. Needs a running tokio runtime.
#[derive(Clone)]
pub struct ChannelTransport {
  tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelTransport {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }

  /// Queues `delivery` for the receiver after `after` has elapsed.
  pub fn schedule(&self, delivery: Delivery, after: Duration) -> OrderlyResult<()> {
    if self.tx.is_closed() {
      return Err(OrderlyError::transport(anyhow!("compensation channel is closed")));
    }
    if after.is_zero() {
      return self
        .tx
        .send(delivery)
        .map_err(|_| OrderlyError::transport(anyhow!("compensation channel is closed")));
    }
    let tx = self.tx.clone();
    tokio::spawn(async move {
      tokio::time::sleep(after).await;
      if tx.send(delivery).is_err() {
        event!(Level::WARN, "Compensation receiver dropped before a delayed message was due.");
      }
    });
    Ok(())
  }
}

#[async_trait]
impl CompensationTransport for ChannelTransport {
  async fn send(&self, payload: Vec<u8>, deliver_after: Duration) -> OrderlyResult<()> {
    self.schedule(Delivery::new(payload), deliver_after)
  }
}
