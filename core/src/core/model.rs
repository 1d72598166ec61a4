// orderly/src/core/model.rs

//! The order data model: the caller-facing `Order`, the persisted `OrderRecord`,
//! the closed `OrderStatus` lifecycle and the compensation wire message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::OrderlyError;

/// Discriminates which registered business handles an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderType(pub i16);

impl fmt::Display for OrderType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// How an order is paid for. Kept open (a code, not an enum) so that a stored
/// payment type this build does not know about is refused rather than lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayType(pub i16);

impl PayType {
  /// No payment required.
  pub const NONE: PayType = PayType(0);
  pub const WECHAT: PayType = PayType(1);
  pub const ALIPAY: PayType = PayType(2);
}

impl fmt::Display for PayType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      PayType::NONE => write!(f, "none(0)"),
      PayType::WECHAT => write!(f, "wechat(1)"),
      PayType::ALIPAY => write!(f, "alipay(2)"),
      PayType(other) => write!(f, "unknown({})", other),
    }
  }
}

/// Payment progress of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayStatus(pub u8);

impl PayStatus {
  pub const UNPAID: PayStatus = PayStatus(0);
  pub const SUCCESS: PayStatus = PayStatus(1);

  pub fn is_success(self) -> bool {
    self == PayStatus::SUCCESS
  }
}

/// Lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OrderStatus {
  /// Created, forwarding in progress.
  Forwarding = 1,
  /// Terminal success.
  Finish = 2,
  /// Terminal, the business vetoed forwarding.
  BusinessCancelForward = 3,
  /// Funds could not be deducted.
  InsufficientBalance = 4,
  /// Reserved: a compensating refund was applied.
  ReturnedBalance = 5,
  /// Reserved: needs manual intervention.
  UnableToAdvance = 6,
}

impl OrderStatus {
  pub fn code(self) -> u8 {
    self as u8
  }
}

impl TryFrom<u8> for OrderStatus {
  type Error = OrderlyError;

  fn try_from(code: u8) -> Result<Self, Self::Error> {
    Ok(match code {
      1 => OrderStatus::Forwarding,
      2 => OrderStatus::Finish,
      3 => OrderStatus::BusinessCancelForward,
      4 => OrderStatus::InsufficientBalance,
      5 => OrderStatus::ReturnedBalance,
      6 => OrderStatus::UnableToAdvance,
      other => return Err(OrderlyError::UnknownStatus { code: other }),
    })
  }
}

impl fmt::Display for OrderStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      OrderStatus::Forwarding => "Forwarding",
      OrderStatus::Finish => "Finish",
      OrderStatus::BusinessCancelForward => "BusinessCancelForward",
      OrderStatus::InsufficientBalance => "InsufficientBalance",
      OrderStatus::ReturnedBalance => "ReturnedBalance",
      OrderStatus::UnableToAdvance => "UnableToAdvance",
    };
    write!(f, "{}({})", name, self.code())
  }
}

/// An order as callers and businesses see it. Never carries its extension payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Order {
  pub order_id: String,
  pub order_type: OrderType,

  pub pay_type: PayType,
  pub pay_status: PayStatus,
  /// Amount in minor currency units.
  pub pay_amount: u32,
  pub third_pay_order_id: String,

  pub owner_id: String,
}

impl Order {
  pub fn new(order_id: impl Into<String>, order_type: OrderType, owner_id: impl Into<String>) -> Self {
    Self {
      order_id: order_id.into(),
      order_type,
      owner_id: owner_id.into(),
      ..Default::default()
    }
  }

  pub fn with_payment(mut self, pay_type: PayType, pay_amount: u32) -> Self {
    self.pay_type = pay_type;
    self.pay_amount = pay_amount;
    self
  }

  pub fn with_third_pay_order_id(mut self, third_pay_order_id: impl Into<String>) -> Self {
    self.third_pay_order_id = third_pay_order_id.into();
    self
  }

  pub(crate) fn into_record(self, status: OrderStatus, extension: String, remark: &str) -> OrderRecord {
    let now = Utc::now();
    OrderRecord {
      id: 0,
      order_id: self.order_id,
      order_type: self.order_type,
      order_status: status,
      pay_type: self.pay_type,
      pay_status: self.pay_status,
      pay_amount: self.pay_amount,
      third_pay_order_id: self.third_pay_order_id,
      owner_id: self.owner_id,
      extension,
      remark: remark.to_string(),
      created_at: now,
      updated_at: now,
      update_count: 0,
    }
  }
}

/// The persisted row owned by the order repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
  /// Row id assigned by the store on insert.
  pub id: u64,
  pub order_id: String,
  pub order_type: OrderType,
  pub order_status: OrderStatus,

  pub pay_type: PayType,
  pub pay_status: PayStatus,
  pub pay_amount: u32,
  pub third_pay_order_id: String,

  pub owner_id: String,
  /// Business-defined serialized structure, opaque here. Empty when none.
  pub extension: String,
  pub remark: String,

  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  /// Incremented on every mutation. Audit only.
  pub update_count: u64,
}

impl OrderRecord {
  pub fn to_order(&self) -> Order {
    Order {
      order_id: self.order_id.clone(),
      order_type: self.order_type,
      pay_type: self.pay_type,
      pay_status: self.pay_status,
      pay_amount: self.pay_amount,
      third_pay_order_id: self.third_pay_order_id.clone(),
      owner_id: self.owner_id.clone(),
    }
  }
}

/// "Please retry forwarding this order." Safe to deliver any number of times.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompensationMessage {
  #[serde(default)]
  pub order_id: String,
  /// Selects the storage partition the order lives in.
  #[serde(default)]
  pub owner_id: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_codes_round_trip_through_u8() {
    for status in [
      OrderStatus::Forwarding,
      OrderStatus::Finish,
      OrderStatus::BusinessCancelForward,
      OrderStatus::InsufficientBalance,
      OrderStatus::ReturnedBalance,
      OrderStatus::UnableToAdvance,
    ] {
      assert_eq!(OrderStatus::try_from(status.code()).unwrap(), status);
    }
    assert!(matches!(
      OrderStatus::try_from(9),
      Err(OrderlyError::UnknownStatus { code: 9 })
    ));
  }

  #[test]
  fn unpaid_is_not_success() {
    assert!(!PayStatus::default().is_success());
    assert!(PayStatus::SUCCESS.is_success());
  }

  #[test]
  fn compensation_message_wire_format() {
    let msg = CompensationMessage {
      order_id: "o1".to_string(),
      owner_id: "u1".to_string(),
    };
    assert_eq!(
      serde_json::to_string(&msg).unwrap(),
      r#"{"order_id":"o1","owner_id":"u1"}"#
    );
    let partial: CompensationMessage = serde_json::from_str(r#"{"owner_id":"u1"}"#).unwrap();
    assert!(partial.order_id.is_empty());
  }
}
