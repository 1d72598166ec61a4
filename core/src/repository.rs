// orderly/src/repository.rs

//! Order rows, routed to a partition by owner.
//!
//! Every operation takes both the order id and the owner id: the owner picks the
//! partition and scopes the row, so one tenant can never reach another's orders.
//! Writes must touch exactly one row; anything else is surfaced as an error.

use std::sync::Arc;
use tracing::{event, instrument, Level};

use crate::core::model::{OrderRecord, OrderStatus, PayStatus};
use crate::core::shard::ShardRouter;
use crate::error::{OrderlyError, OrderlyResult};
use crate::store::{OrderStore, PaymentKey, StatusChange};

#[derive(Clone)]
pub struct OrderRepository {
  store: Arc<dyn OrderStore>,
  router: ShardRouter,
  table_prefix: String,
}

fn require(what: &str, value: &str) -> OrderlyResult<()> {
  if value.is_empty() {
    return Err(OrderlyError::InvalidArgument(format!("{} is empty", what)));
  }
  Ok(())
}

fn expect_one_row(operation: &'static str, order_id: &str, affected: u64) -> OrderlyResult<()> {
  if affected != 1 {
    event!(Level::ERROR, %operation, %order_id, affected, "Order write did not affect exactly one row.");
    return Err(OrderlyError::RowCountMismatch {
      operation,
      order_id: order_id.to_string(),
      affected,
    });
  }
  Ok(())
}

impl OrderRepository {
  pub fn new(store: Arc<dyn OrderStore>, router: ShardRouter, table_prefix: impl Into<String>) -> Self {
    Self {
      store,
      router,
      table_prefix: table_prefix.into(),
    }
  }

  pub fn router(&self) -> ShardRouter {
    self.router
  }

  /// Partition holding `owner_id`'s orders.
  pub fn table_for(&self, owner_id: &str) -> String {
    self.router.table_name(&self.table_prefix, owner_id)
  }

  /// Inserts a new order row and returns its row id.
  #[instrument(
    name = "OrderRepository::create",
    skip_all,
    fields(order_id = %record.order_id, owner_id = %record.owner_id),
    err(Display)
  )]
  pub async fn create(&self, record: OrderRecord) -> OrderlyResult<u64> {
    require("order id", &record.order_id)?;
    require("owner id", &record.owner_id)?;
    let table = self.table_for(&record.owner_id);
    let row_id = self.store.insert(&table, record).await.inspect_err(|e| {
      event!(Level::ERROR, %table, error = %e, "Order insert failed.");
    })?;
    event!(Level::DEBUG, %table, row_id, "Order row created.");
    Ok(row_id)
  }

  #[instrument(name = "OrderRepository::get", skip(self), err(Display))]
  pub async fn get(&self, order_id: &str, owner_id: &str) -> OrderlyResult<OrderRecord> {
    require("order id", order_id)?;
    require("owner id", owner_id)?;
    let table = self.table_for(owner_id);
    match self.store.find(&table, order_id, owner_id).await {
      Ok(Some(record)) => Ok(record),
      Ok(None) => Err(OrderlyError::NotFound {
        order_id: order_id.to_string(),
      }),
      Err(e) => {
        event!(Level::ERROR, %table, error = %e, "Order lookup failed.");
        Err(e)
      }
    }
  }

  /// Sets status and remark, and replaces the extension blob when `extension` is a
  /// non-empty string. Bumps the update counter.
  #[instrument(name = "OrderRepository::update_status", skip(self, extension), err(Display))]
  pub async fn update_status(
    &self,
    order_id: &str,
    owner_id: &str,
    extension: Option<&str>,
    status: OrderStatus,
    remark: &str,
  ) -> OrderlyResult<()> {
    require("order id", order_id)?;
    require("owner id", owner_id)?;
    let table = self.table_for(owner_id);
    let change = StatusChange {
      order_id,
      owner_id,
      extension: extension.filter(|blob| !blob.is_empty()),
      status,
      remark,
    };
    let affected = self.store.update_status(&table, change).await.inspect_err(|e| {
      event!(Level::ERROR, %table, error = %e, "Order status update failed.");
    })?;
    expect_one_row("update_status", order_id, affected)
  }

  /// Sets payment status and remark on the row located by `key`. Bumps the update counter.
  #[instrument(name = "OrderRepository::update_pay_status", skip(self), err(Display))]
  pub async fn update_pay_status(
    &self,
    owner_id: &str,
    key: &PaymentKey,
    pay_status: PayStatus,
    remark: &str,
  ) -> OrderlyResult<()> {
    require("owner id", owner_id)?;
    require("payment key", key.value())?;
    let table = self.table_for(owner_id);
    let affected = self
      .store
      .update_pay_status(&table, owner_id, key, pay_status, remark)
      .await
      .inspect_err(|e| {
        event!(Level::ERROR, %table, error = %e, "Order payment status update failed.");
      })?;
    expect_one_row("update_pay_status", key.value(), affected)
  }
}
