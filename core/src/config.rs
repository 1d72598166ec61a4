// orderly/src/config.rs

//! Options recognized by the coordinator, their defaults, normalization and
//! loading from the environment.

use dotenvy::dotenv;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{OrderlyError, OrderlyResult};

pub const TEMPLATE_ORDER_ID: &str = "<order_id>";
pub const TEMPLATE_ORDER_TYPE: &str = "<order_type>";
pub const TEMPLATE_SHARD_NUM: &str = "<shard_num>";

const DEF_DB_NAME: &str = "order_";
const DEF_TABLE_SHARD_NUMS: u32 = 2;

const DEF_KV_NAME: &str = "order";
const DEF_ORDER_LOCK_EXPIRE_SECS: u64 = 30;
const DEF_ORDER_UNLOCK_LIMIT_PROCESS_SECS: u64 = 10;
const DEF_ORDER_ID_GENERATOR_SHARD_NUMS: u32 = 1000;
const DEF_ORDER_LOCK_KEY_FORMAT: &str = "order:lock:<order_id>";
const DEF_ORDER_SEQ_NO_KEY_FORMAT: &str = "order:seqno:<order_type>:<shard_num>";

const DEF_MQ_NAME: &str = "order";
const DEF_COMPENSATION_DELAY_SECS: u64 = 60;
const DEF_COMPENSATION_RETRY_DELAY_SECS: u64 = 5;

/// Message transports the compensation channel can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
  /// In-process delayed queue (`store::memory::ChannelTransport`).
  #[default]
  Channel,
}

impl FromStr for TransportKind {
  type Err = OrderlyError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "" | "channel" => Ok(TransportKind::Channel),
      other => Err(OrderlyError::Configuration(format!("Unsupported mq_type '{}'", other))),
    }
  }
}

impl<'de> Deserialize<'de> for TransportKind {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(de::Error::custom)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrderlyConfig {
  /// Prefix of the partitioned order tables; the shard number is appended.
  pub db_name: String,
  pub table_shard_nums: u32,

  /// Name of the key-value store used for locks and sequences.
  pub kv_name: String,
  pub order_lock_expire_secs: u64,
  /// An unlock only deletes the lock key when processing finished within this many seconds.
  pub order_unlock_limit_process_secs: u64,
  pub order_id_generator_shard_nums: u32,
  pub order_lock_key_format: String,
  pub order_seq_no_key_format: String,

  pub mq_type: TransportKind,
  pub mq_producer_name: String,
  pub mq_consumer_name: String,
  /// When false, requests to publish a compensation message fail.
  pub allow_mq_compensation: bool,
  pub compensation_delay_secs: u64,
  /// Redeliveries of a message older than this are dropped. 0 disables the check.
  pub compensation_max_lifetime_secs: u64,
  pub compensation_retry_delay_secs: u64,
}

impl Default for OrderlyConfig {
  fn default() -> Self {
    Self {
      db_name: DEF_DB_NAME.to_string(),
      table_shard_nums: DEF_TABLE_SHARD_NUMS,
      kv_name: DEF_KV_NAME.to_string(),
      order_lock_expire_secs: DEF_ORDER_LOCK_EXPIRE_SECS,
      order_unlock_limit_process_secs: DEF_ORDER_UNLOCK_LIMIT_PROCESS_SECS,
      order_id_generator_shard_nums: DEF_ORDER_ID_GENERATOR_SHARD_NUMS,
      order_lock_key_format: DEF_ORDER_LOCK_KEY_FORMAT.to_string(),
      order_seq_no_key_format: DEF_ORDER_SEQ_NO_KEY_FORMAT.to_string(),
      mq_type: TransportKind::default(),
      mq_producer_name: DEF_MQ_NAME.to_string(),
      mq_consumer_name: DEF_MQ_NAME.to_string(),
      allow_mq_compensation: false,
      compensation_delay_secs: DEF_COMPENSATION_DELAY_SECS,
      compensation_max_lifetime_secs: 0,
      compensation_retry_delay_secs: DEF_COMPENSATION_RETRY_DELAY_SECS,
    }
  }
}

impl OrderlyConfig {
  /// Loads `ORDERLY_*` variables (and a `.env` file if present) over the defaults, then `check`s.
  pub fn from_env() -> OrderlyResult<Self> {
    dotenv().ok();

    let get_env = |var_name: &str| env::var(format!("ORDERLY_{}", var_name)).ok();
    fn parse<T: FromStr>(name: &str, raw: Option<String>, default: T) -> OrderlyResult<T>
    where
      T::Err: std::fmt::Display,
    {
      match raw {
        Some(v) => v
          .trim()
          .parse::<T>()
          .map_err(|e| OrderlyError::Configuration(format!("Invalid ORDERLY_{}: {}", name, e))),
        None => Ok(default),
      }
    }

    let def = Self::default();
    let mut conf = Self {
      db_name: get_env("DB_NAME").unwrap_or(def.db_name),
      table_shard_nums: parse("TABLE_SHARD_NUMS", get_env("TABLE_SHARD_NUMS"), def.table_shard_nums)?,
      kv_name: get_env("KV_NAME").unwrap_or(def.kv_name),
      order_lock_expire_secs: parse(
        "ORDER_LOCK_EXPIRE_SECS",
        get_env("ORDER_LOCK_EXPIRE_SECS"),
        def.order_lock_expire_secs,
      )?,
      order_unlock_limit_process_secs: parse(
        "ORDER_UNLOCK_LIMIT_PROCESS_SECS",
        get_env("ORDER_UNLOCK_LIMIT_PROCESS_SECS"),
        def.order_unlock_limit_process_secs,
      )?,
      order_id_generator_shard_nums: parse(
        "ORDER_ID_GENERATOR_SHARD_NUMS",
        get_env("ORDER_ID_GENERATOR_SHARD_NUMS"),
        def.order_id_generator_shard_nums,
      )?,
      order_lock_key_format: get_env("ORDER_LOCK_KEY_FORMAT").unwrap_or(def.order_lock_key_format),
      order_seq_no_key_format: get_env("ORDER_SEQ_NO_KEY_FORMAT").unwrap_or(def.order_seq_no_key_format),
      mq_type: parse("MQ_TYPE", get_env("MQ_TYPE"), def.mq_type)?,
      mq_producer_name: get_env("MQ_PRODUCER_NAME").unwrap_or(def.mq_producer_name),
      mq_consumer_name: get_env("MQ_CONSUMER_NAME").unwrap_or(def.mq_consumer_name),
      allow_mq_compensation: parse(
        "ALLOW_MQ_COMPENSATION",
        get_env("ALLOW_MQ_COMPENSATION"),
        def.allow_mq_compensation,
      )?,
      compensation_delay_secs: parse(
        "COMPENSATION_DELAY_SECS",
        get_env("COMPENSATION_DELAY_SECS"),
        def.compensation_delay_secs,
      )?,
      compensation_max_lifetime_secs: parse(
        "COMPENSATION_MAX_LIFETIME_SECS",
        get_env("COMPENSATION_MAX_LIFETIME_SECS"),
        def.compensation_max_lifetime_secs,
      )?,
      compensation_retry_delay_secs: parse(
        "COMPENSATION_RETRY_DELAY_SECS",
        get_env("COMPENSATION_RETRY_DELAY_SECS"),
        def.compensation_retry_delay_secs,
      )?,
    };
    conf.check()?;

    tracing::info!("Orderly configuration loaded successfully.");
    Ok(conf)
  }

  /// Resets out-of-range values to their defaults and validates the key templates.
  pub fn check(&mut self) -> OrderlyResult<()> {
    if self.db_name.is_empty() {
      self.db_name = DEF_DB_NAME.to_string();
    }
    if self.table_shard_nums < 1 {
      self.table_shard_nums = DEF_TABLE_SHARD_NUMS;
    }

    if self.kv_name.is_empty() {
      self.kv_name = DEF_KV_NAME.to_string();
    }
    if self.order_lock_expire_secs < 1 {
      self.order_lock_expire_secs = DEF_ORDER_LOCK_EXPIRE_SECS;
    }
    if self.order_unlock_limit_process_secs < 1 {
      self.order_unlock_limit_process_secs = DEF_ORDER_UNLOCK_LIMIT_PROCESS_SECS;
    }
    if self.order_id_generator_shard_nums < 1 {
      self.order_id_generator_shard_nums = DEF_ORDER_ID_GENERATOR_SHARD_NUMS;
    }
    if self.order_lock_key_format.is_empty() {
      self.order_lock_key_format = DEF_ORDER_LOCK_KEY_FORMAT.to_string();
    }
    if self.order_seq_no_key_format.is_empty() {
      self.order_seq_no_key_format = DEF_ORDER_SEQ_NO_KEY_FORMAT.to_string();
    }
    if !self.order_lock_key_format.contains(TEMPLATE_ORDER_ID) {
      return Err(OrderlyError::Configuration(format!(
        "order_lock_key_format '{}' must contain {}",
        self.order_lock_key_format, TEMPLATE_ORDER_ID
      )));
    }
    if !self.order_seq_no_key_format.contains(TEMPLATE_SHARD_NUM) {
      return Err(OrderlyError::Configuration(format!(
        "order_seq_no_key_format '{}' must contain {}",
        self.order_seq_no_key_format, TEMPLATE_SHARD_NUM
      )));
    }

    if self.mq_producer_name.is_empty() {
      self.mq_producer_name = DEF_MQ_NAME.to_string();
    }
    if self.mq_consumer_name.is_empty() {
      self.mq_consumer_name = DEF_MQ_NAME.to_string();
    }
    if self.compensation_delay_secs < 1 {
      self.compensation_delay_secs = DEF_COMPENSATION_DELAY_SECS;
    }
    if self.compensation_retry_delay_secs < 1 {
      self.compensation_retry_delay_secs = DEF_COMPENSATION_RETRY_DELAY_SECS;
    }
    Ok(())
  }

  pub fn lock_ttl(&self) -> Duration {
    Duration::from_secs(self.order_lock_expire_secs)
  }

  pub fn unlock_limit_process_time(&self) -> Duration {
    Duration::from_secs(self.order_unlock_limit_process_secs)
  }

  pub fn compensation_delay(&self) -> Duration {
    Duration::from_secs(self.compensation_delay_secs)
  }

  pub fn compensation_retry_delay(&self) -> Duration {
    Duration::from_secs(self.compensation_retry_delay_secs)
  }

  pub fn compensation_max_lifetime(&self) -> Option<Duration> {
    (self.compensation_max_lifetime_secs > 0).then(|| Duration::from_secs(self.compensation_max_lifetime_secs))
  }

  pub fn order_lock_key(&self, order_id: &str) -> String {
    self.order_lock_key_format.replace(TEMPLATE_ORDER_ID, order_id)
  }

  pub fn order_seq_no_key(&self, order_type: i16, shard_num: u32) -> String {
    self
      .order_seq_no_key_format
      .replace(TEMPLATE_ORDER_TYPE, &order_type.to_string())
      .replace(TEMPLATE_SHARD_NUM, &shard_num.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn check_restores_defaults_for_out_of_range_values() {
    let mut conf = OrderlyConfig {
      table_shard_nums: 0,
      order_lock_expire_secs: 0,
      order_unlock_limit_process_secs: 0,
      db_name: String::new(),
      ..Default::default()
    };
    conf.check().unwrap();
    assert_eq!(conf.table_shard_nums, 2);
    assert_eq!(conf.order_lock_expire_secs, 30);
    assert_eq!(conf.order_unlock_limit_process_secs, 10);
    assert_eq!(conf.db_name, "order_");
  }

  #[test]
  fn check_rejects_lock_template_without_order_id() {
    let mut conf = OrderlyConfig {
      order_lock_key_format: "order:lock".to_string(),
      ..Default::default()
    };
    assert!(matches!(conf.check(), Err(OrderlyError::Configuration(_))));
  }

  #[test]
  fn key_templates_substitute_placeholders() {
    let conf = OrderlyConfig::default();
    assert_eq!(conf.order_lock_key("o-1"), "order:lock:o-1");
    assert_eq!(conf.order_seq_no_key(7, 42), "order:seqno:7:42");
  }

  #[test]
  fn deserializes_partial_config_over_defaults() {
    let conf: OrderlyConfig =
      serde_json::from_str(r#"{"table_shard_nums": 8, "allow_mq_compensation": true, "mq_type": "channel"}"#).unwrap();
    assert_eq!(conf.table_shard_nums, 8);
    assert!(conf.allow_mq_compensation);
    assert_eq!(conf.order_lock_expire_secs, 30);

    let bad = serde_json::from_str::<OrderlyConfig>(r#"{"mq_type": "pulsar"}"#);
    assert!(bad.is_err());
  }
}
