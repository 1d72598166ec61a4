// src/lib.rs

//! Orderly: an ASYNC order-fulfillment coordinator for Rust.
//!
//! Orderly moves orders from creation to delivery on behalf of pluggable
//! businesses, with features like:
//!  - A fixed order lifecycle (`Forwarding` → `Finish`, or a cancelled / insufficient-balance state).
//!  - Per-order-type businesses with typed, persisted extension data.
//!  - A per-order advisory lock around every state change.
//!  - Owner-sharded order storage behind an `OrderStore` trait.
//!  - Delayed compensation messages that re-drive orders whose creator stopped halfway.
//!  - Order id generation from per-shard sequences.

pub mod compensation;
pub mod config;
pub mod core;
pub mod error;
pub mod forward;
pub mod lock;
pub mod registry;
pub mod repository;
pub mod store;

// --- Re-exports for the Public API ---

pub use crate::core::business::{BusinessBuilder, CallbackBusiness, OrderBusiness};
pub use crate::core::model::{CompensationMessage, Order, OrderRecord, OrderStatus, OrderType, PayStatus, PayType};
pub use crate::core::outcome::ForwardOutcome;
pub use crate::core::shard::ShardRouter;

pub use crate::compensation::{CompensationConsumer, CompensationWorker};
pub use crate::config::{OrderlyConfig, TransportKind};
pub use crate::error::{OrderlyError, OrderlyResult};
pub use crate::forward::{Forwarder, ForwarderBuilder};
pub use crate::lock::{AdvisoryLock, LockGuard};
pub use crate::registry::{AnyBusiness, BusinessRegistry, ErasedExtension};
pub use crate::repository::OrderRepository;
pub use crate::store::{
  ChannelTransport, CompensationTransport, Delivery, KeyValueStore, MemoryKeyValueStore, MemoryOrderStore, OrderStore,
  PaymentKey, StatusChange,
};

/*
    Typical use:
    1. Build an `OrderlyConfig` (defaults, `from_env`, or by hand).
    2. Build a `Forwarder` with an order store, a key-value store and, when
       compensation is enabled, a compensation transport.
    3. Register one `OrderBusiness` per order type at startup.
    4. Per request: `gen_oid`, `create_order(.., enable_compensation = true)`,
       then `forward` the order you just created.
    5. Run a `CompensationWorker` (or feed your own queue into a
       `CompensationConsumer`) to finish orders whose creator never forwarded them.
*/
