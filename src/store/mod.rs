//! Value storage for the sharded cache.
//!
//! [`ShardStore`] owns one slot arena per shard and coordinates writes,
//! reads, deletes and expiry sweeps against the shared [`Keymaps`]
//! metadata.
//!
//! [`Keymaps`]: crate::ds::Keymaps

pub mod entry;
pub mod metrics;
pub mod sharded;

pub use entry::EntryOptions;
pub use metrics::CacheMetrics;
pub use sharded::{ShardStore, Weigher};
