//! Same-key write coalescing.
//!
//! A writer registers a pending write for its digest before touching the
//! shard and removes it when done. Readers of the same digest block on the
//! pending write, so a `get` issued while a `set` of the same key is in
//! flight observes the finished write rather than racing it.
//!
//! ```text
//!   writer                 PendingWrites              reader
//!   ──────                 ─────────────              ──────
//!   guard(d) ─────────────► {d: pending}
//!                                        ◄──────────── wait(d)  (blocks)
//!   ... place value ...
//!   drop(guard) ──────────► {}  notify_all ──────────► returns
//! ```
//!
//! This is not a lock: two writers of the same digest are not serialized
//! against each other (the second `begin` is absorbed into the first), and
//! distinct digests never interact.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::ds::shard::Digest;

#[derive(Debug, Default)]
struct PendingWrite {
    done: Mutex<bool>,
    finished: Condvar,
}

impl PendingWrite {
    fn complete(&self) {
        *self.done.lock() = true;
        self.finished.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.finished.wait(&mut done);
        }
    }
}

/// Registry of in-flight writes keyed by digest.
#[derive(Debug, Default)]
pub struct PendingWrites {
    pending: Mutex<FxHashMap<Digest, Arc<PendingWrite>>>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `digest` as having an in-flight write.
    ///
    /// Returns false if a write was already pending; the call is absorbed.
    pub fn begin(&self, digest: Digest) -> bool {
        let mut pending = self.pending.lock();
        if pending.contains_key(&digest) {
            return false;
        }
        pending.insert(digest, Arc::new(PendingWrite::default()));
        true
    }

    /// Blocks until no write is pending for `digest`.
    pub fn wait(&self, digest: Digest) {
        // Clone out of the map so the registry lock is not held while blocking.
        let write = self.pending.lock().get(&digest).cloned();
        if let Some(write) = write {
            write.wait();
        }
    }

    /// Completes the pending write for `digest` and wakes its waiters.
    pub fn end(&self, digest: Digest) {
        let write = self.pending.lock().remove(&digest);
        if let Some(write) = write {
            write.complete();
        }
    }

    /// Begins a write that ends when the returned guard is dropped.
    pub fn guard(&self, digest: Digest) -> PendingGuard<'_> {
        let owner = self.begin(digest);
        PendingGuard {
            writes: self,
            digest,
            owner,
        }
    }

    pub fn is_pending(&self, digest: Digest) -> bool {
        self.pending.lock().contains_key(&digest)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ends a pending write on drop, including on early return and unwinding.
#[derive(Debug)]
#[must_use = "the pending write ends as soon as the guard is dropped"]
pub struct PendingGuard<'a> {
    writes: &'a PendingWrites,
    digest: Digest,
    owner: bool,
}

impl PendingGuard<'_> {
    /// True if this guard created the pending write rather than joining one.
    pub fn is_owner(&self) -> bool {
        self.owner
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.owner {
            self.writes.end(self.digest);
        }
    }
}
