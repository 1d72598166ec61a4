// tests/config_tests.rs
use orderly::{OrderlyConfig, OrderlyError, TransportKind};
use serial_test::serial;
use std::env;

const VARS: [&str; 5] = [
  "ORDERLY_TABLE_SHARD_NUMS",
  "ORDERLY_ALLOW_MQ_COMPENSATION",
  "ORDERLY_ORDER_LOCK_KEY_FORMAT",
  "ORDERLY_COMPENSATION_MAX_LIFETIME_SECS",
  "ORDERLY_MQ_TYPE",
];

fn clear_env() {
  for var in VARS {
    env::remove_var(var);
  }
}

#[test]
#[serial]
fn test_from_env_overrides_defaults() {
  clear_env();
  env::set_var("ORDERLY_TABLE_SHARD_NUMS", "16");
  env::set_var("ORDERLY_ALLOW_MQ_COMPENSATION", "true");
  env::set_var("ORDERLY_COMPENSATION_MAX_LIFETIME_SECS", "86400");
  env::set_var("ORDERLY_MQ_TYPE", "Channel");

  let conf = OrderlyConfig::from_env().unwrap();
  assert_eq!(conf.table_shard_nums, 16);
  assert!(conf.allow_mq_compensation);
  assert_eq!(conf.compensation_max_lifetime().map(|d| d.as_secs()), Some(86400));
  assert_eq!(conf.mq_type, TransportKind::Channel);
  assert_eq!(conf.order_lock_expire_secs, 30);
  clear_env();
}

#[test]
#[serial]
fn test_from_env_rejects_bad_values() {
  clear_env();
  env::set_var("ORDERLY_TABLE_SHARD_NUMS", "many");
  assert!(matches!(OrderlyConfig::from_env(), Err(OrderlyError::Configuration(_))));

  clear_env();
  env::set_var("ORDERLY_ORDER_LOCK_KEY_FORMAT", "lock:<order_type>");
  assert!(matches!(OrderlyConfig::from_env(), Err(OrderlyError::Configuration(_))));

  clear_env();
  env::set_var("ORDERLY_MQ_TYPE", "kafka");
  assert!(matches!(OrderlyConfig::from_env(), Err(OrderlyError::Configuration(_))));
  clear_env();
}

#[test]
#[serial]
fn test_zero_shard_count_falls_back_to_default() {
  clear_env();
  env::set_var("ORDERLY_TABLE_SHARD_NUMS", "0");
  let conf = OrderlyConfig::from_env().unwrap();
  assert_eq!(conf.table_shard_nums, 2);
  assert_eq!(conf.compensation_max_lifetime(), None);
  clear_env();
}

#[test]
fn test_deserialized_mq_type_ignores_case() {
  let conf: OrderlyConfig = serde_json::from_str(r#"{"mq_type":"Channel","table_shard_nums":4}"#).unwrap();
  assert_eq!(conf.mq_type, TransportKind::Channel);
  assert_eq!(conf.table_shard_nums, 4);

  let bad = serde_json::from_str::<OrderlyConfig>(r#"{"mq_type":"kafka"}"#);
  assert!(bad.is_err());
}
