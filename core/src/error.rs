// orderly/src/error.rs
use anyhow::Error as AnyhowError;
use thiserror::Error;

use crate::core::model::{OrderType, PayType};

#[derive(Debug, Error)]
pub enum OrderlyError {
  #[error("Order not found: {order_id}")]
  NotFound { order_id: String },

  #[error("Order lock '{key}' is held by another operation")]
  LockUnavailable { key: String },

  #[error("No business registered for order type {order_type}")]
  UnsupportedOrderType { order_type: OrderType },

  #[error("Payment type {pay_type} is not supported")]
  UnsupportedPaymentType { pay_type: PayType },

  #[error("Order already exists: {order_id}")]
  AlreadyExists { order_id: String },

  #[error("Business already registered for order type {order_type}")]
  DuplicateRegistration { order_type: OrderType },

  #[error("Failed to (de)serialize {what} for order '{order_id}'. Source: {source}")]
  Serialization {
    what: &'static str,
    order_id: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("Extension for order type {order_type} has the wrong type, expected {expected_type}")]
  ExtensionTypeMismatch {
    order_type: OrderType,
    expected_type: &'static str,
  },

  #[error("Compensation was requested for order '{order_id}' but compensation is disabled")]
  CompensationDisabled { order_id: String },

  #[error("{operation} affected {affected} rows for order '{order_id}', expected exactly 1")]
  RowCountMismatch {
    operation: &'static str,
    order_id: String,
    affected: u64,
  },

  #[error("Unknown order status code {code}")]
  UnknownStatus { code: u8 },

  #[error("Invalid argument: {0}")]
  InvalidArgument(String),

  #[error("Configuration error: {0}")]
  Configuration(String),

  #[error("Business callback '{stage}' failed (order type {order_type}). Source: {source}")]
  Business {
    stage: &'static str,
    order_type: OrderType,
    #[source]
    source: AnyhowError,
  },

  #[error("Order storage failed. Source: {source}")]
  Storage {
    #[source]
    source: AnyhowError,
  },

  #[error("Lock/sequence store failed. Source: {source}")]
  KeyValue {
    #[source]
    source: AnyhowError,
  },

  #[error("Compensation transport failed. Source: {source}")]
  Transport {
    #[source]
    source: AnyhowError,
  },
}

impl OrderlyError {
  /// Whether retrying the same call later may succeed without any change to the order or the setup.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      OrderlyError::LockUnavailable { .. }
        | OrderlyError::Storage { .. }
        | OrderlyError::KeyValue { .. }
        | OrderlyError::Transport { .. }
    )
  }

  pub(crate) fn storage(source: impl Into<AnyhowError>) -> Self {
    OrderlyError::Storage { source: source.into() }
  }

  pub(crate) fn key_value(source: impl Into<AnyhowError>) -> Self {
    OrderlyError::KeyValue { source: source.into() }
  }

  pub(crate) fn transport(source: impl Into<AnyhowError>) -> Self {
    OrderlyError::Transport { source: source.into() }
  }
}

// Collaborator adapters return anyhow errors; anything not already classified is storage.
impl From<AnyhowError> for OrderlyError {
  fn from(err: AnyhowError) -> Self {
    match err.downcast::<OrderlyError>() {
      Ok(orderly_err) => orderly_err,
      Err(err) => OrderlyError::Storage { source: err },
    }
  }
}

pub type OrderlyResult<T, E = OrderlyError> = std::result::Result<T, E>;
