#![no_main]

use libfuzzer_sys::fuzz_target;
use shardcache::builder::CacheBuilder;
use shardcache::error::CacheError;
use shardcache::policy::EvictionPolicy;

// Arbitrary set/get/delete sequences against a small cache under every
// policy; shard volume accounting must hold after each step.
fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    let policy = match data[0] % 6 {
        5 => None,
        i => Some(EvictionPolicy::ALL[i as usize]),
    };
    let builder = CacheBuilder::new(2, 64).weigher(|v: &Vec<u8>| v.len());
    let cache = match policy {
        Some(policy) => builder.policy(policy).build(),
        None => builder.build(),
    };

    for chunk in data[1..].chunks_exact(2) {
        let key = format!("k{}", chunk[1] % 16);
        match chunk[0] % 3 {
            0 => match cache.set(&key, vec![0; chunk[1] as usize % 80]) {
                Ok(()) => assert!(cache.contains(&key)),
                Err(CacheError::InsufficientCapacity { .. }) => {},
                Err(other) => panic!("unexpected error: {other}"),
            },
            1 => {
                let _ = cache.get(&key);
            },
            _ => {
                cache.delete(&key);
                assert!(!cache.contains(&key));
            },
        }
        if let Err(err) = cache.check_invariants() {
            panic!("{err}");
        }
    }
});
