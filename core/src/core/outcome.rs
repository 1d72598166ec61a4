// orderly/src/core/outcome.rs

use crate::core::model::{Order, OrderStatus};

/// How a forwarding call ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
  /// The order is in `status`: `Finish`, `InsufficientBalance`, or whatever
  /// settled state an earlier call already left it in.
  Completed { order: Order, status: OrderStatus },
  /// The business refused to forward the order; it is now `BusinessCancelForward`.
  Cancelled { order: Order, cause: String },
  /// A redelivery found no such order. Nothing was done.
  Discarded,
}

impl ForwardOutcome {
  pub fn status(&self) -> Option<OrderStatus> {
    match self {
      ForwardOutcome::Completed { status, .. } => Some(*status),
      ForwardOutcome::Cancelled { .. } => Some(OrderStatus::BusinessCancelForward),
      ForwardOutcome::Discarded => None,
    }
  }

  pub fn order(&self) -> Option<&Order> {
    match self {
      ForwardOutcome::Completed { order, .. } | ForwardOutcome::Cancelled { order, .. } => Some(order),
      ForwardOutcome::Discarded => None,
    }
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, ForwardOutcome::Cancelled { .. })
  }
}
