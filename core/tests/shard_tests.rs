// tests/shard_tests.rs
use orderly::ShardRouter;
use proptest::prelude::*;

proptest! {
  #[test]
  fn shard_is_in_range_and_stable(owner in ".{0,64}", count in 1u32..4096) {
    let router = ShardRouter::new(count);
    let shard = router.shard(&owner);
    prop_assert!(shard < count);
    prop_assert_eq!(shard, ShardRouter::new(count).shard(&owner));
  }

  #[test]
  fn table_name_is_prefix_plus_shard(owner in "[a-z0-9-]{1,32}", count in 1u32..64) {
    let router = ShardRouter::new(count);
    prop_assert_eq!(router.table_name("order_", &owner), format!("order_{}", router.shard(&owner)));
  }
}

#[test]
fn known_owners_route_like_crc32_ieee() {
  for owner in ["user-1", "user-2", "", "合作方-42"] {
    let expected = crc32fast::hash(owner.as_bytes()) % 2;
    assert_eq!(ShardRouter::new(2).shard(owner), expected);
  }
}
