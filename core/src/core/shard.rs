// orderly/src/core/shard.rs

//! Deterministic owner-to-partition routing.

/// Maps an owner identifier to one of `shard_count` partitions with
/// `crc32(owner) % shard_count`. The mapping only depends on the owner bytes and
/// the shard count, so it survives restarts; changing the count re-routes owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
  shard_count: u32,
}

impl ShardRouter {
  /// A zero count is treated as a single shard.
  pub fn new(shard_count: u32) -> Self {
    Self {
      shard_count: shard_count.max(1),
    }
  }

  pub fn shard_count(&self) -> u32 {
    self.shard_count
  }

  pub fn shard(&self, owner_id: &str) -> u32 {
    crc32fast::hash(owner_id.as_bytes()) % self.shard_count
  }

  /// Partition name for an owner: the configured prefix followed by the shard number.
  pub fn table_name(&self, prefix: &str, owner_id: &str) -> String {
    format!("{}{}", prefix, self.shard(owner_id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn matches_crc32_ieee() {
    // crc32("123456789") = 0xCBF43926, the standard IEEE check value.
    let router = ShardRouter::new(u32::MAX);
    assert_eq!(router.shard("123456789"), 0xCBF4_3926 % u32::MAX);
    assert_eq!(ShardRouter::new(2).shard("123456789"), 0xCBF4_3926 % 2);
  }

  #[test]
  fn zero_shards_routes_everything_to_zero() {
    let router = ShardRouter::new(0);
    assert_eq!(router.shard_count(), 1);
    assert_eq!(router.shard("anyone"), 0);
    assert_eq!(router.table_name("order_", "anyone"), "order_0");
  }
}
