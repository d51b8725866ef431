#![no_main]

use libfuzzer_sys::fuzz_target;
use shardcache::ds::ShardSelector;
use shardcache::ds::shard::{digest, jump_hash};

// Routing properties over arbitrary keys:
// - the same key always lands on the same shard
// - the shard is always in range
// - growing the shard count only ever moves a key to a new shard
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let shard_count = (data[0] as usize % 64) + 1;
    let key = String::from_utf8_lossy(&data[1..]);
    let selector = ShardSelector::new(shard_count);

    let (d, shard) = selector.route(&key);
    assert_eq!(d, digest(&key));
    assert_eq!(selector.route(&key), (d, shard));
    assert!(shard < shard_count);
    assert_eq!(selector.shard_for_digest(d), shard);

    let grown = jump_hash(d, shard_count + 1);
    assert!(grown == shard || grown == shard_count);
});
