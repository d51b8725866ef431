//! Key hashing and consistent shard routing.
//!
//! Every cache key is reduced to a 64-bit [`Digest`] with FNV-1a, and the
//! digest is mapped to a shard with jump consistent hashing. The digest is the
//! canonical internal identifier of a key everywhere else in the crate.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Shard Routing Flow                              │
//! │                                                                         │
//! │   Input Key ("user:123")                                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │   ┌───────────────────────────────────────────────────────────────┐     │
//! │   │  digest(key)                                                  │     │
//! │   │                                                               │     │
//! │   │  hash = FNV_OFFSET                                            │     │
//! │   │  for byte in key: hash ^= byte; hash *= FNV_PRIME             │     │
//! │   └───────────────────────────────────────────────────────────────┘     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │   ┌───────────────────────────────────────────────────────────────┐     │
//! │   │  jump_hash(digest, shards)                                    │     │
//! │   │                                                               │     │
//! │   │  b = -1, j = 0                                                │     │
//! │   │  while j < shards:                                            │     │
//! │   │      b = j                                                    │     │
//! │   │      key = key * JUMP_MULTIPLIER + 1                          │     │
//! │   │      j = (b + 1) * (2^31 / ((key >> 33) + 1))                 │     │
//! │   └───────────────────────────────────────────────────────────────┘     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │   ┌─────────┬─────────┬─────────┬─────────┐                             │
//! │   │ Shard 0 │ Shard 1 │ Shard 2 │ Shard 3 │                             │
//! │   └─────────┴─────────┴─────────┴─────────┘                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//!
//! Properties
//! ──────────
//! • Deterministic: same (key, shards) always yields the same shard
//! • Monotonic: growing the shard count only moves keys to the new shards
//! • Not cryptographic: collisions are tolerated, not prevented
//! ```
//!
//! ## Example Usage
//!
//! ```
//! use shardcache::ds::ShardSelector;
//!
//! let selector = ShardSelector::new(4);
//! let (digest, shard) = selector.route("reports/sales");
//!
//! assert_eq!(digest, 2546886805339723447);
//! assert_eq!(shard, 2);
//! assert_eq!(selector.shard_for_digest(digest), shard);
//! ```
//!
//! ## Performance
//!
//! - `digest`: O(len) over the key bytes
//! - `jump_hash`: O(ln shards) expected iterations

/// 64-bit hash of a cache key.
pub type Digest = u64;

const FNV_OFFSET: u64 = 14_695_981_039_346_656_037;
const FNV_PRIME: u64 = 1_099_511_628_211;

const JUMP_MULTIPLIER: u64 = 2_862_933_555_777_941_757;
const JUMP_SCALE: f64 = (1u64 << 31) as f64;

/// Hashes a key with 64-bit FNV-1a.
///
/// ```
/// use shardcache::ds::shard::digest;
///
/// assert_eq!(digest("reports/sales"), 2546886805339723447);
/// assert_eq!(digest("reports/sales"), digest("reports/sales"));
/// ```
#[inline]
pub fn digest(key: &str) -> Digest {
    key.as_bytes().iter().fold(FNV_OFFSET, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Maps a digest to a bucket in `[0, shard_count)` with jump consistent hashing.
///
/// A shard count of zero is treated as a single shard.
///
/// See Lamping & Veach, "A Fast, Minimal Memory, Consistent Hash Algorithm".
pub fn jump_hash(digest: Digest, shard_count: usize) -> usize {
    let buckets = shard_count.max(1) as i64;
    let mut key = digest;
    let mut b: i64 = -1;
    let mut j: i64 = 0;

    while j < buckets {
        b = j;
        key = key.wrapping_mul(JUMP_MULTIPLIER).wrapping_add(1);
        j = ((b + 1) as f64 * (JUMP_SCALE / ((key >> 33) + 1) as f64)) as i64;
    }

    b as usize
}

/// Deterministic router from keys to shard indexes.
///
/// Maps any string key to its digest and to a shard index in `[0, shards)`.
/// The shard count is fixed for the lifetime of the selector.
///
/// # Example
///
/// ```
/// use shardcache::ds::ShardSelector;
///
/// let selector = ShardSelector::new(8);
///
/// let (_, shard) = selector.route("my_key");
/// assert!(shard < 8);
/// assert_eq!(selector.route("my_key").1, shard);
///
/// // Zero shards is clamped to 1
/// assert_eq!(ShardSelector::new(0).shard_count(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSelector {
    shards: usize,
}

impl ShardSelector {
    /// Creates a selector for `shards` shards, clamped to at least 1.
    pub fn new(shards: usize) -> Self {
        Self {
            shards: shards.max(1),
        }
    }

    /// Returns the number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards
    }

    /// Hashes `key` and returns its digest together with its shard index.
    #[inline]
    pub fn route(&self, key: &str) -> (Digest, usize) {
        let digest = digest(key);
        (digest, self.shard_for_digest(digest))
    }

    /// Maps an already computed digest to its shard index.
    #[inline]
    pub fn shard_for_digest(&self, digest: Digest) -> usize {
        jump_hash(digest, self.shards)
    }
}

impl Default for ShardSelector {
    /// Creates a single-shard selector.
    fn default() -> Self {
        Self::new(1)
    }
}
