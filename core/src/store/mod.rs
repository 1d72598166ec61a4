// orderly/src/store/mod.rs

//! Boundaries to the external collaborators: the partitioned order table, the
//! key-value store behind locks and sequences, and the delayed message transport.
//!
//! Implementations own their connections and retries. They report failures as
//! `OrderlyError::{Storage, KeyValue, Transport}` and never interpret the
//! extension blob.

use async_trait::async_trait;
use std::time::Duration;

use crate::core::model::{OrderRecord, OrderStatus, PayStatus};
use crate::error::{OrderlyError, OrderlyResult};

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{ChannelTransport, Delivery, MemoryKeyValueStore, MemoryOrderStore};

#[cfg(feature = "redis")]
pub use self::redis::RedisKeyValueStore;

/// A status write against one order row.
#[derive(Debug, Clone, Copy)]
pub struct StatusChange<'a> {
  pub order_id: &'a str,
  pub owner_id: &'a str,
  /// Replaces the stored extension blob when present; `None` leaves it untouched.
  pub extension: Option<&'a str>,
  pub status: OrderStatus,
  pub remark: &'a str,
}

/// Which column locates the row of a payment-status write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentKey {
  OrderId(String),
  ThirdPartyOrderId(String),
}

impl PaymentKey {
  /// Picks the order id when given, the third-party payment reference otherwise.
  pub fn from_parts(order_id: &str, third_pay_order_id: &str) -> OrderlyResult<Self> {
    if !order_id.is_empty() {
      Ok(PaymentKey::OrderId(order_id.to_string()))
    } else if !third_pay_order_id.is_empty() {
      Ok(PaymentKey::ThirdPartyOrderId(third_pay_order_id.to_string()))
    } else {
      Err(OrderlyError::InvalidArgument(
        "order id and third-party payment order id are both empty".to_string(),
      ))
    }
  }

  pub fn value(&self) -> &str {
    match self {
      PaymentKey::OrderId(v) | PaymentKey::ThirdPartyOrderId(v) => v,
    }
  }
}

/// Row-level access to one partition (`table`) of the order table.
#[async_trait]
pub trait OrderStore: Send + Sync {
  /// Inserts a new row and returns its row id. A second row with the same order id
  /// must fail with `OrderlyError::AlreadyExists`.
  async fn insert(&self, table: &str, record: OrderRecord) -> OrderlyResult<u64>;

  async fn find(&self, table: &str, order_id: &str, owner_id: &str) -> OrderlyResult<Option<OrderRecord>>;

  /// Writes status, remark and (optionally) the extension, bumps the update counter
  /// and the update time. Returns the number of affected rows.
  async fn update_status(&self, table: &str, change: StatusChange<'_>) -> OrderlyResult<u64>;

  /// Writes the payment status and remark, bumps the update counter and the update
  /// time. Returns the number of affected rows.
  async fn update_pay_status(
    &self,
    table: &str,
    owner_id: &str,
    key: &PaymentKey,
    pay_status: PayStatus,
    remark: &str,
  ) -> OrderlyResult<u64>;
}

/// Atomic key-value primitives used by the advisory lock and the order id generator.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
  /// Creates `key` with the given expiry if it does not exist. Returns whether it was created.
  async fn set_nx(&self, key: &str, ttl: Duration) -> OrderlyResult<bool>;

  /// Deleting a missing key is not an error.
  async fn delete(&self, key: &str) -> OrderlyResult<()>;

  /// Atomically adds `delta` to the integer at `key` (missing counts as 0) and returns the new value.
  async fn incr_by(&self, key: &str, delta: i64) -> OrderlyResult<i64>;
}

/// Producer side of the compensation channel.
#[async_trait]
pub trait CompensationTransport: Send + Sync {
  /// Publishes `payload` for delivery to the consumer no earlier than `deliver_after` from now.
  async fn send(&self, payload: Vec<u8>, deliver_after: Duration) -> OrderlyResult<()>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn payment_key_prefers_order_id() {
    assert_eq!(
      PaymentKey::from_parts("o1", "t1").unwrap(),
      PaymentKey::OrderId("o1".to_string())
    );
    assert_eq!(
      PaymentKey::from_parts("", "t1").unwrap(),
      PaymentKey::ThirdPartyOrderId("t1".to_string())
    );
    assert!(matches!(
      PaymentKey::from_parts("", ""),
      Err(OrderlyError::InvalidArgument(_))
    ));
  }
}
