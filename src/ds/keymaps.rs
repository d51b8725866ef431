//! Per-key and per-shard metadata registry.
//!
//! `Keymaps` is the single source of truth for where a key lives, how much
//! space it occupies, when it expires, and what the eviction policy knows
//! about it. Values themselves live in the shard store; this module only
//! tracks bookkeeping.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                              Keymaps                                 │
//!   │                                                                      │
//!   │   tables: [RwLock<ShardTable>; shard_count]                          │
//!   │                                                                      │
//!   │   ┌──────────────────────────┐   ┌──────────────────────────┐        │
//!   │   │ shard 0                  │   │ shard 1                  │  ...   │
//!   │   │ volume: 812              │   │ volume: 1024             │        │
//!   │   │ records:                 │   │ records: {}              │        │
//!   │   │   d1 → KeyRecord{..}     │   │                          │        │
//!   │   │   d7 → KeyRecord{..}     │   │                          │        │
//!   │   └──────────────────────────┘   └──────────────────────────┘        │
//!   │                                                                      │
//!   │   sequence: AtomicU64   (insertion order, for FIFO)                  │
//!   │   clock:    AtomicI64   (strictly increasing access stamps)          │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! All fields of a key are kept together in one [`KeyRecord`] inside the
//! table of the shard the key routes to. Each operation takes exactly one
//! table lock, so adding or deleting a key is atomic with respect to the
//! shard's volume: readers never see a record whose size has not been
//! accounted for, or a volume that has been credited for a record that is
//! still present. There is no lock spanning more than one shard.
//!
//! Capacity checks are separate from [`Keymaps::add_key`]; callers verify
//! room first (the shard store does so under the shard's arena lock).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::ds::shard::{Digest, ShardSelector};
use crate::ds::slot_arena::SlotId;
use crate::error::InvariantError;

/// Deadline used for entries without a TTL.
pub const NO_EXPIRY: i64 = i64::MAX;

/// Metadata tracked for every stored key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRecord {
    /// Slot of the value inside its shard's arena.
    pub slot: SlotId,
    pub shard: usize,
    /// Approximate footprint in bytes.
    pub size: usize,
    /// Caller supplied weight, used to break policy ties.
    pub cost: i16,
    /// Absolute expiry deadline in unix seconds.
    pub expires_at: i64,
    /// Policy scratch value: access stamp or access count.
    pub policy_attr: i64,
    /// Registry-wide insertion sequence number.
    pub inserted: u64,
}

impl KeyRecord {
    /// Returns true if the deadline is at or before `now`.
    #[inline]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug)]
struct ShardTable {
    volume: usize,
    records: FxHashMap<Digest, KeyRecord>,
}

/// Metadata registry partitioned by shard.
#[derive(Debug)]
pub struct Keymaps {
    tables: Box<[RwLock<ShardTable>]>,
    selector: ShardSelector,
    shard_size: usize,
    sequence: AtomicU64,
    clock: AtomicI64,
}

impl Keymaps {
    /// Creates a registry for `shard_count` shards of `shard_size` bytes each.
    pub fn new(shard_count: usize, shard_size: usize) -> Self {
        let selector = ShardSelector::new(shard_count);
        let tables = (0..selector.shard_count())
            .map(|_| {
                RwLock::new(ShardTable {
                    volume: shard_size,
                    records: FxHashMap::default(),
                })
            })
            .collect();
        Self {
            tables,
            selector,
            shard_size,
            sequence: AtomicU64::new(0),
            clock: AtomicI64::new(0),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.tables.len()
    }

    /// Configured size of every shard in bytes.
    pub fn shard_size(&self) -> usize {
        self.shard_size
    }

    #[inline]
    fn table_for(&self, digest: Digest) -> &RwLock<ShardTable> {
        &self.tables[self.selector.shard_for_digest(digest)]
    }

    /// Records a new key and charges its size to the shard's volume.
    ///
    /// `shard` must be the shard `digest` routes to. If the digest is already
    /// present the old record is replaced and its size credited back first.
    pub fn add_key(
        &self,
        digest: Digest,
        slot: SlotId,
        shard: usize,
        size: usize,
        cost: i16,
        expires_at: i64,
    ) {
        debug_assert_eq!(shard, self.selector.shard_for_digest(digest));
        let record = KeyRecord {
            slot,
            shard,
            size,
            cost,
            expires_at,
            policy_attr: 0,
            inserted: self.sequence.fetch_add(1, Ordering::Relaxed),
        };

        let mut table = self.tables[shard].write();
        if let Some(previous) = table.records.insert(digest, record) {
            table.volume += previous.size;
        }
        table.volume = table.volume.saturating_sub(size);
    }

    /// Removes a key and credits its size back to its shard.
    ///
    /// Returns the removed record, or `None` if the digest is unknown.
    pub fn delete_key(&self, digest: Digest) -> Option<KeyRecord> {
        let mut table = self.table_for(digest).write();
        let record = table.records.remove(&digest)?;
        table.volume += record.size;
        Some(record)
    }

    /// Remaining volume of a shard in bytes; 0 for an unknown shard.
    pub fn shard_volume(&self, shard: usize) -> usize {
        self.tables.get(shard).map_or(0, |table| table.read().volume)
    }

    /// Returns true if `size` bytes fit into the shard's remaining volume.
    pub fn has_capacity(&self, shard: usize, size: usize) -> bool {
        self.tables
            .get(shard)
            .is_some_and(|table| table.read().volume >= size)
    }

    pub fn slot_index(&self, digest: Digest) -> Option<SlotId> {
        self.record(digest).map(|record| record.slot)
    }

    /// Returns a copy of the full record for `digest`.
    pub fn record(&self, digest: Digest) -> Option<KeyRecord> {
        self.table_for(digest).read().records.get(&digest).copied()
    }

    pub fn contains(&self, digest: Digest) -> bool {
        self.table_for(digest).read().records.contains_key(&digest)
    }

    /// Number of keys across all shards.
    pub fn len(&self) -> usize {
        self.tables.iter().map(|table| table.read().records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys stored in one shard.
    pub fn shard_len(&self, shard: usize) -> usize {
        self.tables
            .get(shard)
            .map_or(0, |table| table.read().records.len())
    }

    /// Snapshot of every digest whose deadline is at or before `now`.
    pub fn stale_digests(&self, now: i64) -> Vec<Digest> {
        let mut stale = Vec::new();
        for table in self.tables.iter() {
            let table = table.read();
            stale.extend(
                table
                    .records
                    .iter()
                    .filter(|(_, record)| record.is_expired(now))
                    .map(|(digest, _)| *digest),
            );
        }
        stale
    }

    /// Overwrites the policy attribute; returns false if the key is unknown.
    pub fn set_policy_attr(&self, digest: Digest, value: i64) -> bool {
        self.update_policy_attr(digest, |_| value)
    }

    pub fn policy_attr(&self, digest: Digest) -> Option<i64> {
        self.record(digest).map(|record| record.policy_attr)
    }

    /// Read-modify-write of the policy attribute under a single lock.
    pub fn update_policy_attr(&self, digest: Digest, f: impl FnOnce(i64) -> i64) -> bool {
        let mut table = self.table_for(digest).write();
        match table.records.get_mut(&digest) {
            Some(record) => {
                record.policy_attr = f(record.policy_attr);
                true
            },
            None => false,
        }
    }

    /// Key of the shard with the smallest policy attribute.
    ///
    /// Ties go to the lower cost, then to the older insertion.
    pub fn digest_with_min_policy_attr(&self, shard: usize) -> Option<Digest> {
        let table = self.tables.get(shard)?.read();
        table
            .records
            .iter()
            .min_by_key(|(_, r)| (r.policy_attr, r.cost, r.inserted))
            .map(|(digest, _)| *digest)
    }

    /// Key of the shard with the largest policy attribute.
    ///
    /// Ties go to the higher cost, then to the older insertion.
    pub fn digest_with_max_policy_attr(&self, shard: usize) -> Option<Digest> {
        let table = self.tables.get(shard)?.read();
        table
            .records
            .iter()
            .max_by_key(|(_, r)| (r.policy_attr, r.cost, std::cmp::Reverse(r.inserted)))
            .map(|(digest, _)| *digest)
    }

    /// Oldest inserted key of the shard.
    pub fn digest_with_min_insertion(&self, shard: usize) -> Option<Digest> {
        let table = self.tables.get(shard)?.read();
        table
            .records
            .iter()
            .min_by_key(|(_, r)| (r.inserted, r.cost))
            .map(|(digest, _)| *digest)
    }

    /// Returns a strictly increasing access stamp in unix nanoseconds.
    ///
    /// Two calls never return the same value, even when the wall clock does
    /// not advance between them or steps backwards.
    pub fn tick(&self) -> i64 {
        let now = unix_nanos();
        let previous = self
            .clock
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or_else(|last| last);
        now.max(previous.saturating_add(1))
    }

    /// Drops every record and restores all shards to full volume.
    pub fn clear(&self) {
        for table in self.tables.iter() {
            let mut table = table.write();
            table.records.clear();
            table.volume = self.shard_size;
        }
    }

    /// Verifies that each shard's volume plus its record sizes equals the
    /// shard size, and that every record sits in the shard it routes to.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        for (shard, table) in self.tables.iter().enumerate() {
            let table = table.read();
            let used: usize = table.records.values().map(|r| r.size).sum();
            if used + table.volume != self.shard_size {
                return Err(InvariantError::new(format!(
                    "shard {shard}: used {used} + volume {} != shard size {}",
                    table.volume, self.shard_size
                )));
            }
            for (digest, record) in &table.records {
                let routed = self.selector.shard_for_digest(*digest);
                if record.shard != shard || routed != shard {
                    return Err(InvariantError::new(format!(
                        "digest {digest} stored in shard {shard}, record says {}, routes to {routed}",
                        record.shard
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Current wall clock time in unix seconds.
pub fn unix_now() -> i64 {
    unix_seconds(SystemTime::now())
}

/// Converts a point in time to unix seconds; negative before the epoch.
pub fn unix_seconds(at: SystemTime) -> i64 {
    match at.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_secs()).map_or(i64::MIN, |secs| -secs),
    }
}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn slot(i: usize) -> SlotId {
        SlotId(i)
    }

    #[test]
    fn add_and_delete_account_volume() {
        let km = Keymaps::new(1, 100);
        km.add_key(1, slot(0), 0, 30, 0, NO_EXPIRY);
        km.add_key(2, slot(1), 0, 20, 0, NO_EXPIRY);
        assert_eq!(km.shard_volume(0), 50);
        assert!(km.has_capacity(0, 50));
        assert!(!km.has_capacity(0, 51));

        let removed = km.delete_key(1).unwrap();
        assert_eq!(removed.size, 30);
        assert_eq!(km.shard_volume(0), 80);
        assert_eq!(km.len(), 1);
        km.check_invariants().unwrap();
    }

    #[test]
    fn delete_unknown_is_noop() {
        let km = Keymaps::new(2, 100);
        assert_eq!(km.delete_key(42), None);
        assert_eq!(km.shard_volume(0), 100);
        assert_eq!(km.shard_volume(1), 100);
    }

    #[test]
    fn re_adding_digest_replaces_record() {
        let km = Keymaps::new(1, 100);
        km.add_key(9, slot(0), 0, 40, 0, NO_EXPIRY);
        km.add_key(9, slot(3), 0, 10, 0, NO_EXPIRY);
        assert_eq!(km.shard_volume(0), 90);
        assert_eq!(km.slot_index(9), Some(slot(3)));
        km.check_invariants().unwrap();
    }

    #[test]
    fn unknown_shard_has_no_capacity() {
        let km = Keymaps::new(2, 100);
        assert_eq!(km.shard_volume(7), 0);
        assert!(!km.has_capacity(7, 0));
        assert_eq!(km.digest_with_min_policy_attr(7), None);
    }

    #[test]
    fn stale_digests_include_deadline_equal_to_now() {
        let km = Keymaps::new(1, 100);
        km.add_key(1, slot(0), 0, 1, 0, 10);
        km.add_key(2, slot(1), 0, 1, 0, 11);
        km.add_key(3, slot(2), 0, 1, 0, NO_EXPIRY);

        let mut stale = km.stale_digests(10);
        stale.sort_unstable();
        assert_eq!(stale, vec![1]);

        let mut stale = km.stale_digests(11);
        stale.sort_unstable();
        assert_eq!(stale, vec![1, 2]);
    }

    #[test]
    fn policy_attr_roundtrip() {
        let km = Keymaps::new(1, 100);
        km.add_key(5, slot(0), 0, 1, 0, NO_EXPIRY);
        assert_eq!(km.policy_attr(5), Some(0));
        assert!(km.set_policy_attr(5, 17));
        assert!(km.update_policy_attr(5, |v| v + 1));
        assert_eq!(km.policy_attr(5), Some(18));
        assert!(!km.set_policy_attr(6, 1));
        assert_eq!(km.policy_attr(6), None);
    }

    #[test]
    fn min_selector_breaks_ties_on_lower_cost() {
        let km = Keymaps::new(1, 100);
        km.add_key(1, slot(0), 0, 1, 5, NO_EXPIRY);
        km.add_key(2, slot(1), 0, 1, 1, NO_EXPIRY);
        km.add_key(3, slot(2), 0, 1, 3, NO_EXPIRY);
        assert_eq!(km.digest_with_min_policy_attr(0), Some(2));

        km.set_policy_attr(2, 10);
        assert_eq!(km.digest_with_min_policy_attr(0), Some(3));
    }

    #[test]
    fn max_selector_breaks_ties_on_higher_cost() {
        let km = Keymaps::new(1, 100);
        km.add_key(1, slot(0), 0, 1, 5, NO_EXPIRY);
        km.add_key(2, slot(1), 0, 1, 9, NO_EXPIRY);
        assert_eq!(km.digest_with_max_policy_attr(0), Some(2));

        km.set_policy_attr(1, 3);
        assert_eq!(km.digest_with_max_policy_attr(0), Some(1));
    }

    #[test]
    fn full_ties_prefer_oldest_insertion() {
        let km = Keymaps::new(1, 100);
        km.add_key(10, slot(0), 0, 1, 0, NO_EXPIRY);
        km.add_key(20, slot(1), 0, 1, 0, NO_EXPIRY);
        assert_eq!(km.digest_with_min_policy_attr(0), Some(10));
        assert_eq!(km.digest_with_max_policy_attr(0), Some(10));
    }

    #[test]
    fn min_insertion_ignores_slot_position() {
        let km = Keymaps::new(1, 100);
        km.add_key(1, slot(5), 0, 1, 0, NO_EXPIRY);
        km.add_key(2, slot(0), 0, 1, 0, NO_EXPIRY);
        assert_eq!(km.digest_with_min_insertion(0), Some(1));
        km.delete_key(1);
        assert_eq!(km.digest_with_min_insertion(0), Some(2));
    }

    #[test]
    fn selectors_on_empty_shard_return_none() {
        let km = Keymaps::new(1, 100);
        assert_eq!(km.digest_with_min_policy_attr(0), None);
        assert_eq!(km.digest_with_max_policy_attr(0), None);
        assert_eq!(km.digest_with_min_insertion(0), None);
    }

    #[test]
    fn selectors_are_scoped_to_shard() {
        let km = Keymaps::new(4, 100);
        let selector = ShardSelector::new(4);
        let (d, shard) = selector.route("reports/sales");
        km.add_key(d, slot(0), shard, 1, 0, NO_EXPIRY);

        for other in (0..4).filter(|s| *s != shard) {
            assert_eq!(km.digest_with_min_policy_attr(other), None);
        }
        assert_eq!(km.digest_with_min_policy_attr(shard), Some(d));
        assert_eq!(km.shard_len(shard), 1);
    }

    #[test]
    fn tick_is_strictly_increasing() {
        let km = Keymaps::new(1, 1);
        let mut last = km.tick();
        for _ in 0..10_000 {
            let next = km.tick();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn clear_restores_volume() {
        let km = Keymaps::new(2, 64);
        km.add_key(1, slot(0), jump(1, 2), 32, 0, NO_EXPIRY);
        km.clear();
        assert!(km.is_empty());
        assert_eq!(km.shard_volume(0), 64);
        assert_eq!(km.shard_volume(1), 64);
    }

    fn jump(d: Digest, n: usize) -> usize {
        crate::ds::shard::jump_hash(d, n)
    }

    proptest! {
        /// Volume accounting stays exact across arbitrary add/delete sequences.
        #[cfg_attr(miri, ignore)]
        #[test]
        fn prop_volume_accounting(
            ops in prop::collection::vec((any::<bool>(), 0u64..32, 0usize..16), 0..200)
        ) {
            let km = Keymaps::new(3, 10_000);
            for (i, (add, d, size)) in ops.into_iter().enumerate() {
                if add {
                    km.add_key(d, slot(i), jump(d, 3), size, 0, NO_EXPIRY);
                } else {
                    km.delete_key(d);
                }
                prop_assert!(km.check_invariants().is_ok());
            }
        }
    }
}
