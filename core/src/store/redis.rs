// orderly/src/store/redis.rs

//! Redis `KeyValueStore`: `SET key 1 NX EX ttl` for locks, `DEL` for unlock and
//! `INCRBY` for order id sequences.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{OrderlyError, OrderlyResult};
use crate::store::KeyValueStore;

pub struct RedisKeyValueStore {
  conn: ConnectionManager,
}

impl RedisKeyValueStore {
  /// Connects to `url` (e.g. `redis://localhost:6379`).
  pub async fn new(url: &str) -> OrderlyResult<Self> {
    let client = Client::open(url).map_err(OrderlyError::key_value)?;
    let conn = ConnectionManager::new(client).await.map_err(OrderlyError::key_value)?;

    info!(url = %url, "Connected to Redis for order locks");

    Ok(Self { conn })
  }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
  async fn set_nx(&self, key: &str, ttl: Duration) -> OrderlyResult<bool> {
    let mut conn = self.conn.clone();
    // Redis rejects EX 0.
    let secs = ttl.as_secs().max(1);
    let reply: Option<String> = redis::cmd("SET")
      .arg(key)
      .arg(1)
      .arg("NX")
      .arg("EX")
      .arg(secs)
      .query_async(&mut conn)
      .await
      .map_err(OrderlyError::key_value)?;

    debug!(key = %key, ttl_secs = secs, acquired = reply.is_some(), "SET NX");
    Ok(reply.is_some())
  }

  async fn delete(&self, key: &str) -> OrderlyResult<()> {
    let mut conn = self.conn.clone();
    let _: i64 = conn.del(key).await.map_err(OrderlyError::key_value)?;
    Ok(())
  }

  async fn incr_by(&self, key: &str, delta: i64) -> OrderlyResult<i64> {
    let mut conn = self.conn.clone();
    conn.incr(key, delta).await.map_err(OrderlyError::key_value)
  }
}
