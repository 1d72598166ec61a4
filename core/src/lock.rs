// orderly/src/lock.rs

//! The per-order advisory lock.
//!
//! Acquisition is a single create-if-absent with expiry on the key-value store.
//! It never waits or retries; a caller that finds the lock held decides what to do.
//!
//! The lock is not fenced. If the holder runs past the TTL the key expires and a
//! second holder can acquire it while the first is still working. Release keeps
//! that window from getting worse: it only deletes the key when the holder
//! finished within its time budget, so a late holder never deletes a lock that
//! may already belong to someone else.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{event, instrument, Level};

use crate::error::OrderlyResult;
use crate::store::KeyValueStore;

#[derive(Clone)]
pub struct AdvisoryLock {
  store: Arc<dyn KeyValueStore>,
}

impl AdvisoryLock {
  pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
    Self { store }
  }

  /// Tries once to take `key` for `ttl`. `Ok(None)` means someone else holds it.
  #[instrument(name = "AdvisoryLock::acquire", skip_all, fields(key = %key, ttl_secs = ttl.as_secs()), err(Display))]
  pub async fn acquire(&self, key: &str, ttl: Duration) -> OrderlyResult<Option<LockGuard>> {
    let acquired_at = Instant::now();
    let acquired = self.store.set_nx(key, ttl).await.inspect_err(|e| {
      event!(Level::ERROR, error = %e, "Lock store SET NX failed.");
    })?;
    if !acquired {
      event!(Level::DEBUG, "Lock is already held.");
      return Ok(None);
    }
    event!(Level::TRACE, "Lock acquired.");
    Ok(Some(LockGuard {
      store: Arc::clone(&self.store),
      key: key.to_string(),
      ttl,
      acquired_at,
    }))
  }
}

/// A held lock. Dropping it without `release` leaves the key to expire on its own.
pub struct LockGuard {
  store: Arc<dyn KeyValueStore>,
  key: String,
  ttl: Duration,
  acquired_at: Instant,
}

impl LockGuard {
  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  pub fn acquired_at(&self) -> Instant {
    self.acquired_at
  }

  /// The time budget `release` actually applies: zero or anything not below the
  /// TTL falls back to half the TTL.
  pub fn effective_limit(&self, limit_process_time: Duration) -> Duration {
    if limit_process_time.is_zero() || limit_process_time >= self.ttl {
      self.ttl / 2
    } else {
      limit_process_time
    }
  }

  /// Deletes the key if no more than `limit_process_time` has passed since acquisition.
  /// Returns whether the key was deleted.
  pub async fn release(self, limit_process_time: Duration) -> OrderlyResult<bool> {
    let limit = self.effective_limit(limit_process_time);
    let elapsed = self.acquired_at.elapsed();
    if elapsed > limit {
      event!(
        Level::WARN,
        key = %self.key,
        elapsed_ms = elapsed.as_millis() as u64,
        limit_ms = limit.as_millis() as u64,
        "Processing exceeded the unlock budget; leaving the lock to expire."
      );
      return Ok(false);
    }
    // A key that already expired counts as released.
    self.store.delete(&self.key).await?;
    event!(Level::TRACE, key = %self.key, "Lock released.");
    Ok(true)
  }
}

impl std::fmt::Debug for LockGuard {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LockGuard")
      .field("key", &self.key)
      .field("ttl", &self.ttl)
      .field("acquired_at", &self.acquired_at)
      .finish()
  }
}
