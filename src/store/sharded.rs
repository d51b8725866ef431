//! Sharded value store and the write/read/delete protocol.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                           ShardStore<V>                              │
//!   │                                                                      │
//!   │   selector: ShardSelector        key → (digest, shard)               │
//!   │   pending:  PendingWrites        same-key read-after-write           │
//!   │   keymaps:  Keymaps              slot / size / ttl / policy attr     │
//!   │   policy:   Option<EvictionPolicy>                                   │
//!   │                                                                      │
//!   │   shards:                                                            │
//!   │   ┌─────────────────────────┐ ┌─────────────────────────┐            │
//!   │   │ RwLock<SlotArena<Arc<V>>│ │ RwLock<SlotArena<Arc<V>>│   ...      │
//!   │   └─────────────────────────┘ └─────────────────────────┘            │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Write path
//!
//! 1. Route the key and register a pending write for its digest.
//! 2. Reject values larger than a whole shard.
//! 3. Evict through the policy until the value fits, counting the key's
//!    existing entry as reclaimable room.
//! 4. Under the shard's write lock, re-check capacity (a concurrent writer
//!    may have taken the room; if so go back to 3), drop the key's existing
//!    entry, store the value in a free slot and record it in the keymaps.
//! 5. End the pending write.
//!
//! ## Lock order
//!
//! A shard's arena lock is always taken before any keymaps table lock, never
//! the other way around. No lock spans more than one shard except `clear`,
//! which takes every arena lock in shard order.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::ds::keymaps::{KeyRecord, Keymaps, unix_now};
use crate::ds::pending::PendingWrites;
use crate::ds::shard::{Digest, ShardSelector};
use crate::ds::slot_arena::SlotArena;
use crate::error::{CacheError, InvariantError, Result};
use crate::policy::{EvictionPolicy, evict_until_can_fit};
use crate::store::entry::EntryOptions;
use crate::store::metrics::{CacheCounters, CacheMetrics};

/// Estimates the footprint of a value in bytes.
pub type Weigher<V> = Box<dyn Fn(&V) -> usize + Send + Sync>;

/// Values of all shards plus the metadata that places them.
pub struct ShardStore<V> {
    shards: Box<[RwLock<SlotArena<Arc<V>>>]>,
    selector: ShardSelector,
    keymaps: Keymaps,
    pending: PendingWrites,
    policy: Option<EvictionPolicy>,
    weigher: Weigher<V>,
    counters: CacheCounters,
}

impl<V> ShardStore<V> {
    pub fn new(
        shard_count: usize,
        shard_size: usize,
        policy: Option<EvictionPolicy>,
        weigher: Weigher<V>,
    ) -> Self {
        let selector = ShardSelector::new(shard_count);
        let shards = (0..selector.shard_count())
            .map(|_| RwLock::new(SlotArena::new()))
            .collect();
        Self {
            shards,
            selector,
            keymaps: Keymaps::new(shard_count, shard_size),
            pending: PendingWrites::new(),
            policy,
            weigher,
            counters: CacheCounters::default(),
        }
    }

    /// Stores `value` under `key`, evicting through the policy if needed.
    ///
    /// The key's current entry, if any, is only replaced once the new value
    /// is known to fit; a rejected `set` leaves it in place unless the policy
    /// itself chose it as a victim.
    pub fn set(&self, key: &str, value: V, options: EntryOptions) -> Result<()> {
        let (digest, shard) = self.selector.route(key);
        let _pending = self.pending.guard(digest);

        let size = (self.weigher)(&value);
        if size > self.keymaps.shard_size() {
            return Err(self.reject(key, size, shard));
        }

        let expires_at = options.deadline();
        let value = Arc::new(value);
        let mut replaced = false;

        loop {
            // The key's own entry is freed by the replace, so it counts as room.
            let reclaimable = self.keymaps.record(digest).map_or(0, |record| record.size);
            let mut own_evicted = false;
            let fitted = evict_until_can_fit(
                self.policy,
                &self.keymaps,
                shard,
                size.saturating_sub(reclaimable),
                |candidate| {
                    let removed = self.remove_entry_if(candidate, |_| true).is_some();
                    own_evicted |= removed && candidate == digest;
                    removed
                },
            );
            replaced |= own_evicted;
            let own = usize::from(own_evicted);
            match fitted {
                Ok(evicted) => self.counters.add_evictions(evicted - own),
                Err(shortfall) => {
                    self.counters.add_evictions(shortfall.evicted - own);
                    return Err(self.reject(key, size, shard));
                },
            }

            let mut arena = self.shards[shard].write();
            // Re-read under the lock: a concurrent writer may have taken the
            // room or rewritten this key in between.
            let reclaimable = self.keymaps.record(digest).map_or(0, |record| record.size);
            if self.keymaps.shard_volume(shard) + reclaimable < size {
                trace!(key, shard, size, "lost shard capacity to a concurrent writer, retrying");
                continue;
            }
            if let Some(previous) = self.keymaps.delete_key(digest) {
                arena.remove(previous.slot);
                replaced = true;
            }

            let slot = arena.insert(Arc::clone(&value));
            self.keymaps
                .add_key(digest, slot, shard, size, options.get_cost(), expires_at);
            if let Some(policy) = self.policy {
                policy.record_insert(&self.keymaps, digest);
            }
            break;
        }

        if replaced {
            self.counters.inc_update();
        } else {
            self.counters.inc_insert();
        }
        trace!(key, digest, shard, size, "stored value");
        Ok(())
    }

    /// Returns the value stored under `key`.
    ///
    /// Waits for an in-flight `set` of the same key first. Entries past their
    /// deadline are reported as absent even before the expiry worker removes
    /// them.
    pub fn get(&self, key: &str) -> Result<Arc<V>> {
        let (digest, shard) = self.selector.route(key);
        self.pending.wait(digest);

        let arena = self.shards[shard].read();
        let value = self
            .keymaps
            .record(digest)
            .filter(|record| !record.is_expired(unix_now()))
            .and_then(|record| arena.get(record.slot).cloned());

        match value {
            Some(value) => {
                if let Some(policy) = self.policy {
                    policy.record_access(&self.keymaps, digest);
                }
                self.counters.inc_hit();
                trace!(key, digest, shard, "cache hit");
                Ok(value)
            },
            None => {
                self.counters.inc_miss();
                trace!(key, digest, shard, "cache miss");
                Err(CacheError::not_present(key))
            },
        }
    }

    /// Removes `key`; returns false if nothing was stored under it.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.delete_by_digest(self.selector.route(key).0);
        if removed {
            self.counters.inc_remove();
        }
        trace!(key, removed, "delete");
        removed
    }

    /// Removes the entry for an already hashed key.
    pub fn delete_by_digest(&self, digest: Digest) -> bool {
        self.remove_entry_if(digest, |_| true).is_some()
    }

    /// Removes every entry whose deadline is at or before `now`.
    ///
    /// An entry rewritten with a later deadline after the stale snapshot was
    /// taken is left alone.
    pub fn expire(&self, now: i64) -> usize {
        let expired = self
            .keymaps
            .stale_digests(now)
            .into_iter()
            .filter(|digest| {
                self.remove_entry_if(*digest, |record| record.is_expired(now))
                    .is_some()
            })
            .count();
        if expired > 0 {
            self.counters.add_expirations(expired);
            debug!(expired, now, "expired stale entries");
        }
        expired
    }

    fn remove_entry_if(
        &self,
        digest: Digest,
        predicate: impl FnOnce(&KeyRecord) -> bool,
    ) -> Option<KeyRecord> {
        let shard = self.selector.shard_for_digest(digest);
        let mut arena = self.shards[shard].write();
        if !predicate(&self.keymaps.record(digest)?) {
            return None;
        }
        let record = self.keymaps.delete_key(digest)?;
        arena.remove(record.slot);
        Some(record)
    }

    fn reject(&self, key: &str, size: usize, shard: usize) -> CacheError {
        let volume = self.keymaps.shard_volume(shard);
        self.counters.inc_rejection();
        debug!(key, size, volume, shard, "not enough shard capacity for value");
        CacheError::InsufficientCapacity {
            key: key.to_owned(),
            size,
            volume,
            shard,
        }
    }

    /// True if a live, unexpired value is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        let digest = self.selector.route(key).0;
        self.keymaps
            .record(digest)
            .is_some_and(|record| !record.is_expired(unix_now()))
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.keymaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keymaps.is_empty()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_size(&self) -> usize {
        self.keymaps.shard_size()
    }

    /// Free bytes left in a shard.
    pub fn shard_volume(&self, shard: usize) -> usize {
        self.keymaps.shard_volume(shard)
    }

    /// Slots backing a shard's arena, live or free.
    pub fn shard_slots(&self, shard: usize) -> usize {
        self.shards.get(shard).map_or(0, |arena| arena.read().slot_count())
    }

    /// Shard `key` is routed to.
    pub fn shard_for_key(&self, key: &str) -> usize {
        self.selector.route(key).1
    }

    pub fn policy(&self) -> Option<EvictionPolicy> {
        self.policy
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.counters.snapshot()
    }

    /// Drops every entry and restores all shards to full volume.
    pub fn clear(&self) {
        let mut arenas: Vec<_> = self.shards.iter().map(|arena| arena.write()).collect();
        for arena in arenas.iter_mut() {
            arena.clear();
        }
        self.keymaps.clear();
    }

    /// Checks volume accounting and that arenas and keymaps agree.
    pub fn check_invariants(&self) -> std::result::Result<(), InvariantError> {
        for (shard, arena) in self.shards.iter().enumerate() {
            let arena = arena.read();
            let recorded = self.keymaps.shard_len(shard);
            if arena.len() != recorded {
                return Err(InvariantError::new(format!(
                    "shard {shard}: arena holds {} values but keymaps track {recorded}",
                    arena.len()
                )));
            }
        }
        self.keymaps.check_invariants()
    }
}

impl<V> fmt::Debug for ShardStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardStore")
            .field("shard_count", &self.shards.len())
            .field("shard_size", &self.keymaps.shard_size())
            .field("policy", &self.policy)
            .field("len", &self.keymaps.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn store(shards: usize, size: usize, policy: Option<EvictionPolicy>) -> ShardStore<Vec<u8>> {
        ShardStore::new(shards, size, policy, Box::new(|v: &Vec<u8>| v.len()))
    }

    #[test]
    fn set_get_delete() {
        let store = store(4, 1024, None);
        store.set("item1", vec![1, 2, 3], EntryOptions::new()).unwrap();
        assert_eq!(*store.get("item1").unwrap(), vec![1, 2, 3]);
        assert!(store.contains("item1"));

        assert!(store.delete("item1"));
        assert!(!store.delete("item1"));
        assert!(matches!(
            store.get("item1"),
            Err(CacheError::ValueNotPresent { .. })
        ));
        store.check_invariants().unwrap();
    }

    #[test]
    fn value_is_shared_not_copied() {
        let store = store(1, 64, None);
        store.set("k", vec![9; 8], EntryOptions::new()).unwrap();
        let a = store.get("k").unwrap();
        let b = store.get("k").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn full_shard_without_policy_rejects() {
        let store = store(1, 1024, None);
        store.set("item1", vec![0; 1024], EntryOptions::new()).unwrap();

        let err = store.set("item2", vec![0; 1], EntryOptions::new()).unwrap_err();
        assert_eq!(
            err,
            CacheError::InsufficientCapacity {
                key: "item2".into(),
                size: 1,
                volume: 0,
                shard: 0,
            }
        );
        assert_eq!(store.get("item1").unwrap().len(), 1024);
        assert_eq!(store.len(), 1);
        assert_eq!(store.metrics().rejections, 1);
    }

    #[test]
    fn oversized_value_rejected_under_any_policy() {
        for policy in EvictionPolicy::ALL {
            let store = store(1, 16, Some(policy));
            store.set("small", vec![0; 4], EntryOptions::new()).unwrap();
            assert!(store.set("big", vec![0; 17], EntryOptions::new()).is_err());
            assert!(store.contains("small"), "{policy} evicted for an impossible value");
        }
    }

    #[test]
    fn replace_reuses_room_without_policy() {
        let store = store(1, 10, None);
        store.set("k", vec![1; 10], EntryOptions::new()).unwrap();
        store.set("k", vec![2; 8], EntryOptions::new()).unwrap();
        assert_eq!(*store.get("k").unwrap(), vec![2; 8]);
        assert_eq!(store.shard_volume(0), 2);
        assert_eq!(store.len(), 1);

        let metrics = store.metrics();
        assert_eq!(metrics.inserts, 1);
        assert_eq!(metrics.updates, 1);
        store.check_invariants().unwrap();
    }

    #[test]
    fn rejected_replace_keeps_old_value() {
        let store = store(1, 10, None);
        store.set("a", vec![0; 5], EntryOptions::new()).unwrap();
        store.set("b", vec![0; 5], EntryOptions::new()).unwrap();
        assert!(store.set("a", vec![0; 6], EntryOptions::new()).is_err());
        assert_eq!(store.get("a").unwrap().len(), 5);
    }

    #[test]
    fn replace_counts_own_entry_as_room() {
        // MRU with "a" read last: the policy's first victim is the key being
        // replaced, which must not be reported as an eviction.
        let store = store(1, 20, Some(EvictionPolicy::Mru));
        store.set("a", vec![1; 10], EntryOptions::new()).unwrap();
        store.set("b", vec![2; 10], EntryOptions::new()).unwrap();
        store.get("a").unwrap();

        store.set("a", vec![3; 12], EntryOptions::new()).unwrap();
        assert_eq!(*store.get("a").unwrap(), vec![3; 12]);
        assert!(!store.contains("b"));

        let metrics = store.metrics();
        assert_eq!(metrics.evictions, 1);
        assert_eq!(metrics.updates, 1);
        assert_eq!(metrics.inserts, 2);
        store.check_invariants().unwrap();
    }

    #[test]
    fn replace_that_fits_in_own_room_evicts_nothing() {
        for policy in EvictionPolicy::ALL {
            let store = store(1, 20, Some(policy));
            store.set("a", vec![1; 10], EntryOptions::new()).unwrap();
            store.set("b", vec![2; 10], EntryOptions::new()).unwrap();

            store.set("b", vec![4; 10], EntryOptions::new()).unwrap();
            assert!(store.contains("a"), "{policy}");
            assert_eq!(*store.get("b").unwrap(), vec![4; 10]);
            assert_eq!(store.metrics().evictions, 0, "{policy}");
        }
    }

    #[test]
    fn eviction_makes_room() {
        let store = store(1, 10, Some(EvictionPolicy::Fifo));
        store.set("a", vec![0; 4], EntryOptions::new()).unwrap();
        store.set("b", vec![0; 4], EntryOptions::new()).unwrap();
        store.set("c", vec![0; 4], EntryOptions::new()).unwrap();

        assert!(!store.contains("a"));
        assert!(store.contains("b"));
        assert!(store.contains("c"));
        assert_eq!(store.metrics().evictions, 1);
        store.check_invariants().unwrap();
    }

    #[test]
    fn churn_reuses_slots() {
        let store = store(1, 100, Some(EvictionPolicy::Lru));
        for i in 0..1_000 {
            store
                .set(&format!("key-{i}"), vec![0; 10], EntryOptions::new())
                .unwrap();
        }
        assert_eq!(store.len(), 10);
        assert_eq!(store.shard_slots(0), 10);
        store.check_invariants().unwrap();
    }

    #[test]
    fn expired_entry_reads_as_absent() {
        let store = store(1, 100, None);
        let past = SystemTime::now() - Duration::from_secs(1);
        store
            .set("temp", vec![1], EntryOptions::new().expires_at(past))
            .unwrap();
        assert!(store.get("temp").is_err());
        assert!(!store.contains("temp"));
        assert_eq!(store.len(), 1);

        assert_eq!(store.expire(unix_now()), 1);
        assert!(store.is_empty());
        assert_eq!(store.shard_volume(0), 100);
        assert_eq!(store.metrics().expirations, 1);
    }

    #[test]
    fn expire_skips_entries_rewritten_with_later_deadline() {
        let store = store(1, 100, None);
        store
            .set("k", vec![1], EntryOptions::new().ttl(Duration::from_secs(3600)))
            .unwrap();
        let now = unix_now();
        assert_eq!(store.expire(now), 0);
        assert!(store.contains("k"));
    }

    #[test]
    fn clear_resets_everything() {
        let store = store(2, 50, None);
        for key in ["a", "b", "c", "d"] {
            store.set(key, vec![0; 5], EntryOptions::new()).unwrap();
        }
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.shard_volume(0), 50);
        assert_eq!(store.shard_volume(1), 50);
        store.check_invariants().unwrap();
    }

    #[test]
    fn lfu_counts_reads_through_get() {
        let store = store(1, 30, Some(EvictionPolicy::Lfu));
        store.set("hot", vec![0; 10], EntryOptions::new()).unwrap();
        store.set("cold", vec![0; 10], EntryOptions::new()).unwrap();
        store.set("warm", vec![0; 10], EntryOptions::new()).unwrap();
        for _ in 0..5 {
            store.get("hot").unwrap();
        }
        store.get("warm").unwrap();

        store.set("new", vec![0; 10], EntryOptions::new()).unwrap();
        assert!(!store.contains("cold"));
        assert!(store.contains("hot"));
        assert!(store.contains("warm"));
    }

    #[test]
    fn cost_breaks_lfu_ties() {
        let store = store(1, 20, Some(EvictionPolicy::Lfu));
        store
            .set("valuable", vec![0; 10], EntryOptions::new().cost(10))
            .unwrap();
        store
            .set("cheap", vec![0; 10], EntryOptions::new().cost(1))
            .unwrap();
        store.set("next", vec![0; 10], EntryOptions::new()).unwrap();
        assert!(store.contains("valuable"));
        assert!(!store.contains("cheap"));
    }
}
