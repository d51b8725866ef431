//! Eviction policy engine.
//!
//! A policy is a pair of rules over the metadata in [`Keymaps`]: how to pick
//! the next eviction candidate in a shard, and how to update a key's policy
//! attribute when it is inserted or read. The set of policies is closed and
//! chosen once when the cache is built, so it is a plain enum rather than a
//! trait object.
//!
//! ## Policy Comparison
//!
//! | Policy | Candidate                     | On insert    | On read       |
//! |--------|-------------------------------|--------------|---------------|
//! | LRU    | smallest attr (oldest stamp)  | attr = stamp | attr = stamp  |
//! | MRU    | largest attr (newest stamp)   | attr = stamp | attr = stamp  |
//! | LFU    | smallest attr (lowest count)  | attr = 0     | attr += 1     |
//! | MFU    | largest attr (highest count)  | attr = 0     | attr += 1     |
//! | FIFO   | oldest insertion              | -            | -             |
//!
//! Attribute ties are broken by cost: "smallest" policies evict the lower
//! cost entry first, "largest" policies the higher cost one.
//!
//! ## Eviction-to-fit
//!
//! ```text
//!   evict_until_can_fit(shard, size)
//!       │
//!       ▼
//!   ┌──────────────────────┐  yes
//!   │ volume(shard) >= size├──────────► Ok(evicted)
//!   └──────────┬───────────┘
//!              │ no
//!              ▼
//!   ┌──────────────────────┐  none
//!   │ select_candidate     ├──────────► Err(EvictionShortfall)
//!   └──────────┬───────────┘
//!              │ digest
//!              ▼
//!        evict(digest) ───────► loop
//! ```
//!
//! The loop stops as soon as the pending value fits, so it never evicts more
//! than needed, and it fails instead of spinning when the shard has nothing
//! left to evict.
//!
//! ## Example Usage
//!
//! ```
//! use shardcache::policy::EvictionPolicy;
//!
//! let policy: EvictionPolicy = "lfu".parse().unwrap();
//! assert_eq!(policy, EvictionPolicy::Lfu);
//! assert_eq!(policy.to_string(), "LFU");
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::ds::keymaps::Keymaps;
use crate::ds::shard::Digest;

/// Eviction policy selected at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionPolicy {
    /// Least Recently Used.
    Lru,
    /// Most Recently Used.
    Mru,
    /// Least Frequently Used.
    Lfu,
    /// Most Frequently Used.
    Mfu,
    /// First In, First Out.
    Fifo,
}

impl EvictionPolicy {
    pub const ALL: [EvictionPolicy; 5] = [
        EvictionPolicy::Lru,
        EvictionPolicy::Mru,
        EvictionPolicy::Lfu,
        EvictionPolicy::Mfu,
        EvictionPolicy::Fifo,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "LRU",
            EvictionPolicy::Mru => "MRU",
            EvictionPolicy::Lfu => "LFU",
            EvictionPolicy::Mfu => "MFU",
            EvictionPolicy::Fifo => "FIFO",
        }
    }

    /// Picks the next key to evict from `shard`, or `None` if it is empty.
    pub fn select_candidate(self, keymaps: &Keymaps, shard: usize) -> Option<Digest> {
        match self {
            EvictionPolicy::Lru | EvictionPolicy::Lfu => keymaps.digest_with_min_policy_attr(shard),
            EvictionPolicy::Mru | EvictionPolicy::Mfu => keymaps.digest_with_max_policy_attr(shard),
            EvictionPolicy::Fifo => keymaps.digest_with_min_insertion(shard),
        }
    }

    /// Initializes the policy attribute of a freshly inserted key.
    pub fn record_insert(self, keymaps: &Keymaps, digest: Digest) {
        match self {
            EvictionPolicy::Lru | EvictionPolicy::Mru => {
                keymaps.set_policy_attr(digest, keymaps.tick());
            },
            // Counters start at zero, FIFO ignores the attribute.
            EvictionPolicy::Lfu | EvictionPolicy::Mfu | EvictionPolicy::Fifo => {},
        }
    }

    /// Updates the policy attribute of a key that was just read.
    pub fn record_access(self, keymaps: &Keymaps, digest: Digest) {
        match self {
            EvictionPolicy::Lru | EvictionPolicy::Mru => {
                let stamp = keymaps.tick();
                keymaps.set_policy_attr(digest, stamp);
            },
            EvictionPolicy::Lfu | EvictionPolicy::Mfu => {
                keymaps.update_policy_attr(digest, |count| count.saturating_add(1));
            },
            EvictionPolicy::Fifo => {},
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a string names no known policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown eviction policy `{0}`, expected one of lru, mru, lfu, mfu, fifo")]
pub struct ParsePolicyError(String);

impl FromStr for EvictionPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EvictionPolicy::ALL
            .into_iter()
            .find(|policy| policy.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParsePolicyError(s.to_owned()))
    }
}

/// Returned when eviction cannot make room in a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionShortfall {
    /// Keys evicted before giving up.
    pub evicted: usize,
    /// Free volume left in the shard.
    pub volume: usize,
}

/// Evicts keys from `shard` until `size` bytes fit.
///
/// `evict` removes one key and returns false if it was already gone. Returns
/// the number of keys evicted. Fails immediately when no policy is set, when
/// `size` exceeds the whole shard, or once the shard has no candidates left.
pub fn evict_until_can_fit(
    policy: Option<EvictionPolicy>,
    keymaps: &Keymaps,
    shard: usize,
    size: usize,
    mut evict: impl FnMut(Digest) -> bool,
) -> Result<usize, EvictionShortfall> {
    let mut evicted = 0;
    loop {
        if keymaps.has_capacity(shard, size) {
            return Ok(evicted);
        }

        let candidate = match policy {
            Some(policy) if size <= keymaps.shard_size() => policy.select_candidate(keymaps, shard),
            _ => None,
        };
        let Some(digest) = candidate else {
            // Concurrent deletes may have emptied the shard since the check above.
            if keymaps.has_capacity(shard, size) {
                return Ok(evicted);
            }
            return Err(EvictionShortfall {
                evicted,
                volume: keymaps.shard_volume(shard),
            });
        };

        if evict(digest) {
            evicted += 1;
            debug!(digest, shard, size, policy = ?policy, "evicted key to make room");
        }
    }
}
