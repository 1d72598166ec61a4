// orderly/src/core/business.rs

//! The contract a business implements to drive its orders forward.
//!
//! Each order type maps to one business. The engine calls it at four points:
//! `can_forward` before anything is charged, `deliver` once payment is settled,
//! and `on_finish` / `on_abnormal` once the order has reached (or is found in) a
//! final state. `on_finish` and `on_abnormal` may run more than once for the same
//! order, since redelivered forwards of a settled order re-signal the outcome.
//!
//! A business may carry a typed extension: business-specific state stored as an
//! opaque JSON blob next to the order. The engine decodes it before the callbacks
//! and never looks inside.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::core::model::{Order, OrderStatus};

#[async_trait]
pub trait OrderBusiness: Send + Sync + 'static {
  type Extension: Serialize + DeserializeOwned + Send + Sync + 'static;

  /// A fresh extension value to decode stored blobs into. `None` means this
  /// business has no extension and stored blobs are ignored.
  fn new_extension(&self) -> Option<Self::Extension> {
    None
  }

  /// `Ok(Some(cause))` cancels the order with `cause` as its remark.
  async fn can_forward(
    &self,
    _order: &Order,
    _extension: Option<&mut Self::Extension>,
  ) -> anyhow::Result<Option<String>> {
    Ok(None)
  }

  /// Hands over whatever the order bought. The order is only marked finished
  /// after this returns `Ok`.
  async fn deliver(&self, _order: &Order, _extension: Option<&mut Self::Extension>) -> anyhow::Result<()> {
    Ok(())
  }

  /// Called with any state other than `Forwarding` or `Finish`.
  async fn on_abnormal(
    &self,
    _order: &Order,
    _extension: Option<&mut Self::Extension>,
    _status: OrderStatus,
  ) -> anyhow::Result<()> {
    Ok(())
  }

  async fn on_finish(&self, _order: &Order, _extension: Option<&mut Self::Extension>) -> anyhow::Result<()> {
    Ok(())
  }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>;

/// Callback taking the order and a copy of its extension.
pub type BusinessCallback<E, T> = Box<dyn Fn(Order, Option<E>) -> BoxFuture<T> + Send + Sync>;

/// Callback for abnormal states; also receives the status.
pub type AbnormalCallback<E> = Box<dyn Fn(Order, Option<E>, OrderStatus) -> BoxFuture<()> + Send + Sync>;

/// A business assembled from closures, for callers that don't want to define a type.
///
/// Callbacks get owned copies of the order and extension, so they cannot change
/// the extension that gets persisted. Implement `OrderBusiness` directly for that.
pub struct CallbackBusiness<E> {
  template: Option<E>,
  can_forward: Option<BusinessCallback<E, Option<String>>>,
  deliver: Option<BusinessCallback<E, ()>>,
  on_abnormal: Option<AbnormalCallback<E>>,
  on_finish: Option<BusinessCallback<E, ()>>,
}

pub struct BusinessBuilder<E> {
  inner: CallbackBusiness<E>,
}

impl<E> Default for BusinessBuilder<E> {
  fn default() -> Self {
    Self {
      inner: CallbackBusiness {
        template: None,
        can_forward: None,
        deliver: None,
        on_abnormal: None,
        on_finish: None,
      },
    }
  }
}

impl<E> BusinessBuilder<E>
where
  E: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self::default()
  }

  /// Declares an extension; stored blobs are decoded on top of `template`.
  pub fn extension(mut self, template: E) -> Self {
    self.inner.template = Some(template);
    self
  }

  pub fn can_forward<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(Order, Option<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
  {
    self.inner.can_forward = Some(Box::new(move |order, ext| Box::pin(f(order, ext))));
    self
  }

  pub fn deliver<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(Order, Option<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    self.inner.deliver = Some(Box::new(move |order, ext| Box::pin(f(order, ext))));
    self
  }

  pub fn on_abnormal<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(Order, Option<E>, OrderStatus) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    self.inner.on_abnormal = Some(Box::new(move |order, ext, status| Box::pin(f(order, ext, status))));
    self
  }

  pub fn on_finish<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(Order, Option<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    self.inner.on_finish = Some(Box::new(move |order, ext| Box::pin(f(order, ext))));
    self
  }

  pub fn build(self) -> Arc<CallbackBusiness<E>> {
    Arc::new(self.inner)
  }
}

#[async_trait]
impl<E> OrderBusiness for CallbackBusiness<E>
where
  E: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
  type Extension = E;

  fn new_extension(&self) -> Option<E> {
    self.template.clone()
  }

  async fn can_forward(&self, order: &Order, extension: Option<&mut E>) -> anyhow::Result<Option<String>> {
    match &self.can_forward {
      Some(f) => f(order.clone(), extension.cloned()).await,
      None => Ok(None),
    }
  }

  async fn deliver(&self, order: &Order, extension: Option<&mut E>) -> anyhow::Result<()> {
    match &self.deliver {
      Some(f) => f(order.clone(), extension.cloned()).await,
      None => Ok(()),
    }
  }

  async fn on_abnormal(&self, order: &Order, extension: Option<&mut E>, status: OrderStatus) -> anyhow::Result<()> {
    match &self.on_abnormal {
      Some(f) => f(order.clone(), extension.cloned(), status).await,
      None => Ok(()),
    }
  }

  async fn on_finish(&self, order: &Order, extension: Option<&mut E>) -> anyhow::Result<()> {
    match &self.on_finish {
      Some(f) => f(order.clone(), extension.cloned()).await,
      None => Ok(()),
    }
  }
}
