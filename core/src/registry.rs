// orderly/src/registry.rs

//! Defines `BusinessRegistry`, the order-type-keyed table of businesses.
//! Businesses are stored behind the type-erased `AnyBusiness` so that each one can
//! keep its own typed extension.

use crate::core::business::OrderBusiness;
use crate::core::model::{Order, OrderStatus, OrderType};
use crate::error::{OrderlyError, OrderlyResult};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{event, Level};

/// An extension value with its type erased. Empty when the business declares none
/// or the caller passed none.
#[derive(Default)]
pub struct ErasedExtension(Option<Box<dyn Any + Send + Sync>>);

impl ErasedExtension {
  pub fn none() -> Self {
    Self(None)
  }

  pub fn new<E: Any + Send + Sync>(value: E) -> Self {
    Self(Some(Box::new(value)))
  }

  pub fn from_option<E: Any + Send + Sync>(value: Option<E>) -> Self {
    Self(value.map(|v| Box::new(v) as Box<dyn Any + Send + Sync>))
  }

  pub fn is_none(&self) -> bool {
    self.0.is_none()
  }

  pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
    self.0.as_ref().and_then(|b| b.downcast_ref::<E>())
  }

  /// Takes the value out if it is an `E`; leaves it in place otherwise.
  pub fn take<E: Any>(&mut self) -> Option<E> {
    match self.0.take() {
      Some(b) => match b.downcast::<E>() {
        Ok(v) => Some(*v),
        Err(b) => {
          self.0 = Some(b);
          None
        }
      },
      None => None,
    }
  }
}

impl std::fmt::Debug for ErasedExtension {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("ErasedExtension")
      .field(&if self.0.is_some() { "Some(..)" } else { "None" })
      .finish()
  }
}

/// Type-erased business as seen by the engine.
#[async_trait]
pub trait AnyBusiness: Send + Sync {
  fn order_type(&self) -> OrderType;

  /// Decodes a stored blob. Empty when the business declares no extension; the
  /// fresh extension when the blob is empty.
  fn decode_extension(&self, order_id: &str, blob: &str) -> OrderlyResult<ErasedExtension>;

  /// Encodes an extension for storage. `Ok(None)` when there is nothing to store.
  fn encode_extension(&self, order_id: &str, extension: &ErasedExtension) -> OrderlyResult<Option<String>>;

  async fn can_forward(&self, order: &Order, extension: &mut ErasedExtension) -> OrderlyResult<Option<String>>;

  async fn deliver(&self, order: &Order, extension: &mut ErasedExtension) -> OrderlyResult<()>;

  async fn on_abnormal(&self, order: &Order, extension: &mut ErasedExtension, status: OrderStatus) -> OrderlyResult<()>;

  async fn on_finish(&self, order: &Order, extension: &mut ErasedExtension) -> OrderlyResult<()>;
}

/// Adapts an `OrderBusiness` to `AnyBusiness`.
struct BusinessWrapper<B: OrderBusiness> {
  order_type: OrderType,
  business: Arc<B>,
}

impl<B: OrderBusiness> BusinessWrapper<B> {
  fn typed<'a>(&self, extension: &'a mut ErasedExtension) -> OrderlyResult<Option<&'a mut B::Extension>> {
    match extension.0.as_mut() {
      None => Ok(None),
      Some(boxed) => match boxed.downcast_mut::<B::Extension>() {
        Some(ext) => Ok(Some(ext)),
        None => {
          let expected_type = std::any::type_name::<B::Extension>();
          event!(Level::ERROR, order_type = %self.order_type, %expected_type, "Extension type mismatch.");
          Err(OrderlyError::ExtensionTypeMismatch {
            order_type: self.order_type,
            expected_type,
          })
        }
      },
    }
  }

  fn business_err(&self, stage: &'static str) -> impl FnOnce(anyhow::Error) -> OrderlyError {
    let order_type = self.order_type;
    move |source| OrderlyError::Business {
      stage,
      order_type,
      source,
    }
  }
}

#[async_trait]
impl<B: OrderBusiness> AnyBusiness for BusinessWrapper<B> {
  fn order_type(&self) -> OrderType {
    self.order_type
  }

  fn decode_extension(&self, order_id: &str, blob: &str) -> OrderlyResult<ErasedExtension> {
    let Some(template) = self.business.new_extension() else {
      return Ok(ErasedExtension::none());
    };
    if blob.is_empty() {
      return Ok(ErasedExtension::new(template));
    }
    let decode_err = |source: serde_json::Error| OrderlyError::Serialization {
      what: "extension",
      order_id: order_id.to_string(),
      source,
    };
    // Fields missing from the blob keep their template values.
    let base = serde_json::to_value(&template).map_err(decode_err)?;
    let stored: Value = serde_json::from_str(blob).map_err(decode_err)?;
    let merged = match (base, stored) {
      (Value::Object(mut base), Value::Object(fields)) => {
        base.extend(fields);
        Value::Object(base)
      }
      (_, other) => other,
    };
    let value: B::Extension = serde_json::from_value(merged).map_err(decode_err)?;
    Ok(ErasedExtension::new(value))
  }

  fn encode_extension(&self, order_id: &str, extension: &ErasedExtension) -> OrderlyResult<Option<String>> {
    let Some(boxed) = extension.0.as_ref() else {
      return Ok(None);
    };
    let Some(value) = boxed.downcast_ref::<B::Extension>() else {
      return Err(OrderlyError::ExtensionTypeMismatch {
        order_type: self.order_type,
        expected_type: std::any::type_name::<B::Extension>(),
      });
    };
    serde_json::to_string(value)
      .map(Some)
      .map_err(|source| OrderlyError::Serialization {
        what: "extension",
        order_id: order_id.to_string(),
        source,
      })
  }

  async fn can_forward(&self, order: &Order, extension: &mut ErasedExtension) -> OrderlyResult<Option<String>> {
    let ext = self.typed(extension)?;
    let cause = self
      .business
      .can_forward(order, ext)
      .await
      .map_err(self.business_err("can_forward"))?;
    // An empty cause is not a cancellation.
    Ok(cause.filter(|c| !c.is_empty()))
  }

  async fn deliver(&self, order: &Order, extension: &mut ErasedExtension) -> OrderlyResult<()> {
    let ext = self.typed(extension)?;
    self.business.deliver(order, ext).await.map_err(self.business_err("deliver"))
  }

  async fn on_abnormal(&self, order: &Order, extension: &mut ErasedExtension, status: OrderStatus) -> OrderlyResult<()> {
    let ext = self.typed(extension)?;
    self
      .business
      .on_abnormal(order, ext, status)
      .await
      .map_err(self.business_err("on_abnormal"))
  }

  async fn on_finish(&self, order: &Order, extension: &mut ErasedExtension) -> OrderlyResult<()> {
    let ext = self.typed(extension)?;
    self.business.on_finish(order, ext).await.map_err(self.business_err("on_finish"))
  }
}

/// Order type to business. Filled at startup, read on every forward.
#[derive(Default)]
pub struct BusinessRegistry {
  businesses: RwLock<HashMap<OrderType, Arc<dyn AnyBusiness>>>,
}

impl BusinessRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers `business` for `order_type`. A second registration for the same
  /// type is a setup error and leaves the first in place.
  pub fn register<B: OrderBusiness>(&self, order_type: OrderType, business: Arc<B>) -> OrderlyResult<()> {
    let mut businesses = self.businesses.write();
    if businesses.contains_key(&order_type) {
      event!(Level::ERROR, %order_type, "Duplicate business registration.");
      return Err(OrderlyError::DuplicateRegistration { order_type });
    }
    event!(
      Level::DEBUG,
      %order_type,
      business_type = %std::any::type_name::<B>(),
      extension_type = %std::any::type_name::<B::Extension>(),
      "Registering business."
    );
    businesses.insert(order_type, Arc::new(BusinessWrapper { order_type, business }));
    Ok(())
  }

  pub fn lookup(&self, order_type: OrderType) -> Option<Arc<dyn AnyBusiness>> {
    self.businesses.read().get(&order_type).cloned()
  }

  pub fn order_types(&self) -> Vec<OrderType> {
    let mut types: Vec<OrderType> = self.businesses.read().keys().copied().collect();
    types.sort();
    types
  }
}
