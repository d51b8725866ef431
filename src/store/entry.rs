//! Per-entry write options.

use std::time::{Duration, SystemTime};

use crate::ds::keymaps::{NO_EXPIRY, unix_seconds};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Expiry {
    #[default]
    Never,
    After(Duration),
    At(SystemTime),
}

/// Options for a single `set`: eviction cost and expiry.
///
/// ```
/// use std::time::Duration;
/// use shardcache::store::EntryOptions;
///
/// let options = EntryOptions::new().cost(3).ttl(Duration::from_secs(60));
/// assert_eq!(options.get_cost(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryOptions {
    cost: i16,
    expiry: Expiry,
}

impl EntryOptions {
    /// Zero cost, no expiry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tie-break weight used by eviction policies.
    pub fn cost(mut self, cost: i16) -> Self {
        self.cost = cost;
        self
    }

    /// Expires the entry `ttl` after the write.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.expiry = Expiry::After(ttl);
        self
    }

    /// Expires the entry at an absolute point in time, which may already
    /// have passed.
    pub fn expires_at(mut self, at: SystemTime) -> Self {
        self.expiry = Expiry::At(at);
        self
    }

    pub fn get_cost(&self) -> i16 {
        self.cost
    }

    /// Absolute deadline in unix seconds, resolved against the current time.
    pub(crate) fn deadline(&self) -> i64 {
        match self.expiry {
            Expiry::Never => NO_EXPIRY,
            Expiry::After(ttl) => SystemTime::now()
                .checked_add(ttl)
                .map_or(NO_EXPIRY, unix_seconds),
            Expiry::At(at) => unix_seconds(at),
        }
    }
}
