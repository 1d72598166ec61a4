// orderly/src/forward.rs

//! The forwarding engine.
//!
//! `Forwarder` owns the business registry and the collaborators, and moves orders
//! through their lifecycle:
//!
//! ```text
//! Forwarding ──can_forward vetoes──▶ BusinessCancelForward
//!     │ ──deduction fails─────────▶ InsufficientBalance
//!     └─deliver ok────────────────▶ Finish
//! ```
//!
//! Every state change happens while holding the order's advisory lock. Forwarding
//! an order that has already left `Forwarding` changes nothing and re-signals its
//! current state to the business, so redelivered forwards are harmless.

use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tracing::{event, instrument, Level};

use crate::compensation::encode_message;
use crate::config::OrderlyConfig;
use crate::core::business::OrderBusiness;
use crate::core::model::{Order, OrderStatus, OrderType, PayStatus, PayType};
use crate::core::outcome::ForwardOutcome;
use crate::core::shard::ShardRouter;
use crate::error::{OrderlyError, OrderlyResult};
use crate::lock::AdvisoryLock;
use crate::registry::{AnyBusiness, BusinessRegistry, ErasedExtension};
use crate::repository::OrderRepository;
use crate::store::{CompensationTransport, KeyValueStore, OrderStore, PaymentKey};

const REMARK_CREATED: &str = "Created";
const REMARK_FINISHED: &str = "forward finish";
const REMARK_INSUFFICIENT_BALANCE: &str = "InsufficientBalance";

/// Assembles a `Forwarder` from its configuration and collaborators.
pub struct ForwarderBuilder {
  config: OrderlyConfig,
  order_store: Option<Arc<dyn OrderStore>>,
  kv_store: Option<Arc<dyn KeyValueStore>>,
  transport: Option<Arc<dyn CompensationTransport>>,
}

impl ForwarderBuilder {
  pub fn new(config: OrderlyConfig) -> Self {
    Self {
      config,
      order_store: None,
      kv_store: None,
      transport: None,
    }
  }

  pub fn order_store(mut self, store: Arc<dyn OrderStore>) -> Self {
    self.order_store = Some(store);
    self
  }

  pub fn kv_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
    self.kv_store = Some(store);
    self
  }

  pub fn transport(mut self, transport: Arc<dyn CompensationTransport>) -> Self {
    self.transport = Some(transport);
    self
  }

  pub fn build(self) -> OrderlyResult<Forwarder> {
    let mut config = self.config;
    config.check()?;

    let order_store = self
      .order_store
      .ok_or_else(|| OrderlyError::Configuration("an order store is required".to_string()))?;
    let kv_store = self
      .kv_store
      .ok_or_else(|| OrderlyError::Configuration("a key-value store is required".to_string()))?;
    if config.allow_mq_compensation && self.transport.is_none() {
      return Err(OrderlyError::Configuration(
        "allow_mq_compensation is set but no compensation transport was given".to_string(),
      ));
    }

    event!(
      Level::INFO,
      db_name = %config.db_name,
      table_shard_nums = config.table_shard_nums,
      allow_mq_compensation = config.allow_mq_compensation,
      "Order forwarder ready."
    );

    Ok(Forwarder {
      repository: OrderRepository::new(order_store, ShardRouter::new(config.table_shard_nums), &config.db_name),
      id_router: ShardRouter::new(config.order_id_generator_shard_nums),
      lock: AdvisoryLock::new(Arc::clone(&kv_store)),
      kv_store,
      transport: self.transport,
      registry: BusinessRegistry::new(),
      config,
    })
  }
}

pub struct Forwarder {
  config: OrderlyConfig,
  registry: BusinessRegistry,
  repository: OrderRepository,
  lock: AdvisoryLock,
  kv_store: Arc<dyn KeyValueStore>,
  transport: Option<Arc<dyn CompensationTransport>>,
  id_router: ShardRouter,
}

fn require_ids(order_id: &str, owner_id: &str) -> OrderlyResult<()> {
  if order_id.is_empty() || owner_id.is_empty() {
    return Err(OrderlyError::InvalidArgument(
      "order id and owner id are both required".to_string(),
    ));
  }
  Ok(())
}

impl Forwarder {
  pub fn builder(config: OrderlyConfig) -> ForwarderBuilder {
    ForwarderBuilder::new(config)
  }

  pub fn config(&self) -> &OrderlyConfig {
    &self.config
  }

  pub fn repository(&self) -> &OrderRepository {
    &self.repository
  }

  /// Registers the business handling `order_type`. Meant for startup; a second
  /// registration for the same type fails with `DuplicateRegistration`.
  pub fn register_business<B: OrderBusiness>(&self, order_type: OrderType, business: Arc<B>) -> OrderlyResult<()> {
    self.registry.register(order_type, business)
  }

  pub fn business(&self, order_type: OrderType) -> Option<Arc<dyn AnyBusiness>> {
    self.registry.lookup(order_type)
  }

  fn require_business(&self, order_type: OrderType) -> OrderlyResult<Arc<dyn AnyBusiness>> {
    self.registry.lookup(order_type).ok_or_else(|| {
      event!(Level::ERROR, %order_type, "No business registered for order type.");
      OrderlyError::UnsupportedOrderType { order_type }
    })
  }

  // --- Creation ---

  /// Persists a new order in `Forwarding`.
  ///
  /// With `enable_compensation` the compensation message is published first, so a
  /// crash before the insert leaves a message that finds no order and is dropped.
  /// A publish failure is returned and nothing is inserted.
  #[instrument(
    name = "Forwarder::create_order",
    skip_all,
    fields(order_id = %order.order_id, owner_id = %order.owner_id, order_type = %order.order_type),
    err(Display)
  )]
  pub async fn create_order<E: Serialize>(
    &self,
    order: &Order,
    extension: Option<&E>,
    enable_compensation: bool,
  ) -> OrderlyResult<()> {
    require_ids(&order.order_id, &order.owner_id)?;
    let blob = match extension {
      Some(ext) => serde_json::to_string(ext).map_err(|source| OrderlyError::Serialization {
        what: "extension",
        order_id: order.order_id.clone(),
        source,
      })?,
      None => String::new(),
    };

    if enable_compensation {
      self.send_compensation_signal(&order.order_id, &order.owner_id).await?;
    } else {
      event!(Level::WARN, "Order created without a compensation message.");
    }

    let record = order.clone().into_record(OrderStatus::Forwarding, blob, REMARK_CREATED);
    self.repository.create(record).await?;
    Ok(())
  }

  /// Publishes a compensation message for the order, delivered after the configured delay.
  #[instrument(name = "Forwarder::send_compensation_signal", skip(self), err(Display))]
  pub async fn send_compensation_signal(&self, order_id: &str, owner_id: &str) -> OrderlyResult<()> {
    if !self.config.allow_mq_compensation {
      event!(Level::WARN, "Compensation requested but allow_mq_compensation is false.");
      return Err(OrderlyError::CompensationDisabled {
        order_id: order_id.to_string(),
      });
    }
    let transport = self
      .transport
      .as_ref()
      .ok_or_else(|| OrderlyError::Configuration("no compensation transport".to_string()))?;
    let payload = encode_message(order_id, owner_id)?;
    transport
      .send(payload, self.config.compensation_delay())
      .await
      .inspect_err(|e| {
        event!(Level::ERROR, error = %e, "Publishing the compensation message failed.");
      })
  }

  // --- Reads ---

  /// The order, its raw extension blob and its status.
  pub async fn get_order(&self, order_id: &str, owner_id: &str) -> OrderlyResult<(Order, String, OrderStatus)> {
    let record = self.repository.get(order_id, owner_id).await?;
    let order = record.to_order();
    Ok((order, record.extension, record.order_status))
  }

  // --- Forwarding ---

  /// Forwards an order created by this caller in the same logical operation.
  ///
  /// `order` and `extension` are trusted as the current state and are not re-read.
  /// Only pass an order nothing else could have touched since `create_order`;
  /// use `forward_by_id` everywhere else. `E` must be the extension type of the
  /// business registered for the order type.
  #[instrument(
    name = "Forwarder::forward",
    skip_all,
    fields(order_id = %order.order_id, owner_id = %order.owner_id),
    err(Display)
  )]
  pub async fn forward<E: Any + Send + Sync>(&self, order: Order, extension: Option<E>) -> OrderlyResult<ForwardOutcome> {
    require_ids(&order.order_id, &order.owner_id)?;
    let order_id = order.order_id.clone();
    self
      .with_order_lock(&order_id, || async move {
        let business = self.require_business(order.order_type)?;
        let extension = ErasedExtension::from_option(extension);
        self.drive(business.as_ref(), order, extension, OrderStatus::Forwarding).await
      })
      .await
  }

  /// Re-reads the order under its lock and forwards it from whatever state it is in.
  pub async fn forward_by_id(&self, order_id: &str, owner_id: &str) -> OrderlyResult<ForwardOutcome> {
    self.forward_stored(order_id, owner_id, false).await
  }

  /// `forward_by_id` for the compensation path: an order that no longer exists
  /// yields `ForwardOutcome::Discarded` instead of `NotFound`.
  pub async fn redeliver(&self, order_id: &str, owner_id: &str) -> OrderlyResult<ForwardOutcome> {
    self.forward_stored(order_id, owner_id, true).await
  }

  #[instrument(name = "Forwarder::forward_by_id", skip(self), err(Display))]
  async fn forward_stored(&self, order_id: &str, owner_id: &str, redelivery: bool) -> OrderlyResult<ForwardOutcome> {
    require_ids(order_id, owner_id)?;
    self
      .with_order_lock(order_id, || async move {
        let record = match self.repository.get(order_id, owner_id).await {
          Ok(record) => record,
          Err(OrderlyError::NotFound { .. }) if redelivery => {
            event!(Level::INFO, "Redelivered order no longer exists; dropping.");
            return Ok(ForwardOutcome::Discarded);
          }
          Err(e) => return Err(e),
        };
        let business = self.require_business(record.order_type)?;
        let extension = business.decode_extension(order_id, &record.extension)?;
        self
          .drive(business.as_ref(), record.to_order(), extension, record.order_status)
          .await
      })
      .await
  }

  /// Runs one forwarding step for an order currently in `status`. Caller holds the lock.
  async fn drive(
    &self,
    business: &dyn AnyBusiness,
    order: Order,
    mut extension: ErasedExtension,
    status: OrderStatus,
  ) -> OrderlyResult<ForwardOutcome> {
    if status != OrderStatus::Forwarding {
      if status == OrderStatus::Finish {
        business.on_finish(&order, &mut extension).await?;
      } else {
        event!(Level::WARN, %status, "Order is not forwarding; re-signalling its state.");
        business.on_abnormal(&order, &mut extension, status).await?;
      }
      return Ok(ForwardOutcome::Completed { order, status });
    }

    if let Some(cause) = business.can_forward(&order, &mut extension).await? {
      event!(Level::WARN, %cause, "Business cancelled forwarding.");
      let status = OrderStatus::BusinessCancelForward;
      self.write_status(business, &order, &extension, status, &cause).await?;
      business.on_abnormal(&order, &mut extension, status).await?;
      return Ok(ForwardOutcome::Cancelled { order, cause });
    }

    if !self.deduct_balance(&order)? {
      let status = OrderStatus::InsufficientBalance;
      event!(Level::WARN, "Balance deduction failed.");
      self
        .write_status(business, &order, &extension, status, REMARK_INSUFFICIENT_BALANCE)
        .await?;
      business.on_abnormal(&order, &mut extension, status).await?;
      return Ok(ForwardOutcome::Completed { order, status });
    }

    business.deliver(&order, &mut extension).await?;

    let status = OrderStatus::Finish;
    self
      .write_status(business, &order, &extension, status, REMARK_FINISHED)
      .await?;
    business.on_finish(&order, &mut extension).await?;
    event!(Level::DEBUG, "Order forwarded to finish.");
    Ok(ForwardOutcome::Completed { order, status })
  }

  /// Settles payment before delivery. `Ok(false)` means insufficient funds.
  fn deduct_balance(&self, order: &Order) -> OrderlyResult<bool> {
    if order.pay_status.is_success() {
      return Ok(true);
    }
    // Every payment type other than NONE needs a payment backend; until one
    // exists they are refused instead of being treated as free.
    match order.pay_type {
      PayType::NONE => Ok(true),
      pay_type => {
        event!(Level::ERROR, %pay_type, "No balance deduction for payment type.");
        Err(OrderlyError::UnsupportedPaymentType { pay_type })
      }
    }
  }

  async fn write_status(
    &self,
    business: &dyn AnyBusiness,
    order: &Order,
    extension: &ErasedExtension,
    status: OrderStatus,
    remark: &str,
  ) -> OrderlyResult<()> {
    let blob = business.encode_extension(&order.order_id, extension)?;
    self
      .repository
      .update_status(&order.order_id, &order.owner_id, blob.as_deref(), status, remark)
      .await
  }

  // --- Direct updates ---

  /// Sets the payment status of an order, under its lock.
  #[instrument(name = "Forwarder::update_pay_status", skip(self), err(Display))]
  pub async fn update_pay_status(
    &self,
    order_id: &str,
    owner_id: &str,
    pay_status: PayStatus,
    remark: &str,
  ) -> OrderlyResult<()> {
    require_ids(order_id, owner_id)?;
    self
      .with_order_lock(order_id, || async move {
        self
          .repository
          .update_pay_status(owner_id, &PaymentKey::OrderId(order_id.to_string()), pay_status, remark)
          .await
      })
      .await
  }

  /// Sets the status and remark of an order, and its extension when one is given,
  /// under its lock. No transition rules apply here; this is the escape hatch for
  /// businesses and operators.
  #[instrument(name = "Forwarder::update_order_status", skip(self, extension), err(Display))]
  pub async fn update_order_status<E: Serialize>(
    &self,
    order_id: &str,
    owner_id: &str,
    extension: Option<&E>,
    status: OrderStatus,
    remark: &str,
  ) -> OrderlyResult<()> {
    require_ids(order_id, owner_id)?;
    let blob = extension
      .map(serde_json::to_string)
      .transpose()
      .map_err(|source| OrderlyError::Serialization {
        what: "extension",
        order_id: order_id.to_string(),
        source,
      })?;
    self
      .with_order_lock(order_id, || async move {
        self
          .repository
          .update_status(order_id, owner_id, blob.as_deref(), status, remark)
          .await
      })
      .await
  }

  // --- Order ids ---

  /// `order-sgen-{type}-{shard}-{seq}-{unix_secs}`, with `seq` taken from a
  /// per-(type, shard) counter in the key-value store.
  pub async fn gen_oid(&self, order_type: OrderType, owner_id: &str) -> OrderlyResult<String> {
    let shard = self.id_router.shard(owner_id);
    let key = self.config.order_seq_no_key(order_type.0, shard);
    let seq = self.kv_store.incr_by(&key, 1).await.inspect_err(|e| {
      event!(Level::ERROR, %key, error = %e, "Order sequence increment failed.");
    })?;
    Ok(format!(
      "order-sgen-{}-{}-{}-{}",
      order_type,
      shard,
      seq,
      chrono::Utc::now().timestamp()
    ))
  }

  /// `order-uoid-{type}-{shard}-{owner}-{user_order_id}`.
  pub fn gen_oid_by_user_oid(&self, order_type: OrderType, owner_id: &str, user_order_id: &str) -> String {
    let shard = self.id_router.shard(owner_id);
    format!("order-uoid-{}-{}-{}-{}", order_type, shard, owner_id, user_order_id)
  }

  /// `order-third-{type}-{shard}-{owner}-{third_pay_order_id}`.
  pub fn gen_oid_by_third_pay_oid(&self, order_type: OrderType, owner_id: &str, third_pay_order_id: &str) -> String {
    let shard = self.id_router.shard(owner_id);
    format!("order-third-{}-{}-{}-{}", order_type, shard, owner_id, third_pay_order_id)
  }

  // --- Locking ---

  /// Runs `f` while holding the order's lock. Fails with `LockUnavailable` if the
  /// lock is held. The lock is released on every exit; a failed release is logged
  /// and left to expire.
  async fn with_order_lock<T, F, Fut>(&self, order_id: &str, f: F) -> OrderlyResult<T>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = OrderlyResult<T>>,
  {
    let key = self.config.order_lock_key(order_id);
    let Some(guard) = self.lock.acquire(&key, self.config.lock_ttl()).await? else {
      event!(Level::WARN, %order_id, "Order lock is held by another operation.");
      return Err(OrderlyError::LockUnavailable { key });
    };

    let result = f().await;

    if let Err(e) = guard.release(self.config.unlock_limit_process_time()).await {
      event!(Level::WARN, %order_id, error = %e, "Releasing the order lock failed; it will expire on its own.");
    }
    result
  }
}
