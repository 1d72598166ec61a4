// orderly/src/compensation.rs

//! The compensation path: delayed redelivery of a forward for orders whose
//! creator may never have finished forwarding them.
//!
//! `CompensationConsumer` is transport-agnostic: give it the payload and the first
//! publish time, and it tells you whether to acknowledge (`Ok`) or retry (`Err`).
//! `CompensationWorker` drives it from the in-process `ChannelTransport`.

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{event, instrument, Level};

use crate::core::model::CompensationMessage;
use crate::core::outcome::ForwardOutcome;
use crate::error::{OrderlyError, OrderlyResult};
use crate::forward::Forwarder;
use crate::store::{ChannelTransport, Delivery};

pub fn encode_message(order_id: &str, owner_id: &str) -> OrderlyResult<Vec<u8>> {
  let message = CompensationMessage {
    order_id: order_id.to_string(),
    owner_id: owner_id.to_string(),
  };
  serde_json::to_vec(&message).map_err(|source| OrderlyError::Serialization {
    what: "compensation message",
    order_id: order_id.to_string(),
    source,
  })
}

#[derive(Clone)]
pub struct CompensationConsumer {
  forwarder: Arc<Forwarder>,
}

impl CompensationConsumer {
  pub fn new(forwarder: Arc<Forwarder>) -> Self {
    Self { forwarder }
  }

  /// Handles one delivery. `Ok` means acknowledge; `Err` means redeliver later.
  ///
  /// Malformed messages, messages past the configured lifetime, cancelled orders
  /// and orders that no longer exist are all acknowledged.
  #[instrument(name = "CompensationConsumer::consume", skip_all, err(Display))]
  pub async fn consume(&self, payload: &[u8], published_at: SystemTime) -> OrderlyResult<()> {
    let message: CompensationMessage = match serde_json::from_slice(payload) {
      Ok(message) => message,
      Err(e) => {
        event!(Level::ERROR, error = %e, payload_len = payload.len(), "Dropping malformed compensation message.");
        return Ok(());
      }
    };
    if message.order_id.is_empty() || message.owner_id.is_empty() {
      event!(Level::ERROR, ?message, "Dropping compensation message without order or owner id.");
      return Ok(());
    }

    if let Some(max_lifetime) = self.forwarder.config().compensation_max_lifetime() {
      let age = SystemTime::now().duration_since(published_at).unwrap_or(Duration::ZERO);
      if age > max_lifetime {
        event!(
          Level::WARN,
          order_id = %message.order_id,
          age_secs = age.as_secs(),
          "Compensation message outlived its lifetime; giving up."
        );
        return Ok(());
      }
    }

    match self.forwarder.redeliver(&message.order_id, &message.owner_id).await {
      Ok(ForwardOutcome::Cancelled { cause, .. }) => {
        event!(Level::INFO, order_id = %message.order_id, %cause, "Compensated order was cancelled by its business.");
        Ok(())
      }
      Ok(ForwardOutcome::Discarded) => Ok(()),
      Ok(ForwardOutcome::Completed { status, .. }) => {
        event!(Level::DEBUG, order_id = %message.order_id, %status, "Compensation handled.");
        Ok(())
      }
      Err(e) => Err(e),
    }
  }
}

/// Consumes the in-process compensation channel until shut down.
///
/// Each delivery is handled on its own task, so a slow business never holds up
/// compensation of other orders. A failed delivery goes back on the channel after
/// the configured retry delay, keeping its first publish time. On shutdown the
/// worker stops receiving and waits for deliveries already in flight.
pub struct CompensationWorker {
  consumer: CompensationConsumer,
  transport: ChannelTransport,
  deliveries: mpsc::UnboundedReceiver<Delivery>,
  retry_delay: Duration,
}

impl CompensationWorker {
  pub fn new(
    forwarder: Arc<Forwarder>,
    transport: ChannelTransport,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
  ) -> Self {
    let retry_delay = forwarder.config().compensation_retry_delay();
    Self {
      consumer: CompensationConsumer::new(forwarder),
      transport,
      deliveries,
      retry_delay,
    }
  }

  /// Runs until `shutdown` turns true or is dropped, or every sender is gone.
  pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
    event!(Level::INFO, "Compensation worker started.");
    let mut in_flight = JoinSet::new();
    loop {
      if *shutdown.borrow() {
        break;
      }
      tokio::select! {
        changed = shutdown.changed() => {
          if changed.is_err() {
            break;
          }
        }
        Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
          if let Err(e) = joined {
            event!(Level::ERROR, error = %e, "Compensation task did not complete.");
          }
        }
        delivery = self.deliveries.recv() => {
          let Some(delivery) = delivery else {
            break;
          };
          in_flight.spawn(handle(
            self.consumer.clone(),
            self.transport.clone(),
            self.retry_delay,
            delivery,
          ));
        }
      }
    }
    event!(Level::INFO, pending = in_flight.len(), "Compensation worker draining.");
    while let Some(joined) = in_flight.join_next().await {
      if let Err(e) = joined {
        event!(Level::ERROR, error = %e, "Compensation task did not complete.");
      }
    }
    event!(Level::INFO, "Compensation worker stopped.");
  }
}

async fn handle(consumer: CompensationConsumer, transport: ChannelTransport, retry_delay: Duration, delivery: Delivery) {
  let Err(e) = consumer.consume(&delivery.payload, delivery.published_at).await else {
    return;
  };
  event!(
    Level::WARN,
    attempt = delivery.attempt,
    retryable = e.is_retryable(),
    error = %e,
    retry_in_secs = retry_delay.as_secs(),
    "Compensation failed; scheduling a retry."
  );
  let retry = Delivery {
    attempt: delivery.attempt.saturating_add(1),
    ..delivery
  };
  if let Err(e) = transport.schedule(retry, retry_delay) {
    event!(Level::ERROR, error = %e, "Could not re-queue compensation message; it is lost.");
  }
}
