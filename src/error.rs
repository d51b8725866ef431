//! Error types for the shardcache library.
//!
//! ## Key Components
//!
//! - [`CacheError`]: Returned by `set`/`get`/`delete` when an operation cannot
//!   complete (missing value, not enough shard capacity, uninitialized cell).
//! - [`ConfigError`]: Returned when cache configuration parameters are invalid
//!   (e.g. zero shards, zero shard size).
//! - [`InvariantError`]: Returned by `check_invariants` when the capacity
//!   accounting of a shard no longer adds up.
//!
//! ## Example Usage
//!
//! ```
//! use shardcache::builder::CacheBuilder;
//! use shardcache::error::{CacheError, ConfigError};
//!
//! let bad = CacheBuilder::<String>::new(0, 1024).try_build();
//! assert_eq!(bad.err(), Some(ConfigError::ZeroShards));
//!
//! let cache = CacheBuilder::<String>::new(1, 1024).build();
//! let err = cache.get("missing").unwrap_err();
//! assert!(matches!(err, CacheError::ValueNotPresent { .. }));
//! ```

use thiserror::Error;

/// Result alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

// ---------------------------------------------------------------------------
// CacheError
// ---------------------------------------------------------------------------

/// Errors returned by cache operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The cache behind a [`CacheCell`](crate::cell::CacheCell) was used
    /// before `init` succeeded.
    #[error("cache is not initialized, call `init` before using it")]
    NotInitialized,

    /// No live value is stored under the key.
    #[error("value for `{key}` is not present in the cache")]
    ValueNotPresent { key: String },

    /// The value does not fit into its shard.
    ///
    /// Returned when the value is larger than the whole shard, when no
    /// eviction policy is configured and the shard lacks free volume, or when
    /// the policy ran out of eviction candidates.
    #[error(
        "can't fit value for `{key}`: value has size {size} but shard[{shard}] has {volume} free"
    )]
    InsufficientCapacity {
        key: String,
        size: usize,
        volume: usize,
        shard: usize,
    },
}

impl CacheError {
    pub(crate) fn not_present(key: &str) -> Self {
        Self::ValueNotPresent {
            key: key.to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when cache configuration parameters are invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("shard count must be greater than 0")]
    ZeroShards,

    #[error("shard size must be greater than 0")]
    ZeroShardSize,

    #[error("sweep interval must be greater than 0")]
    ZeroSweepInterval,
}

// ---------------------------------------------------------------------------
// InvariantError
// ---------------------------------------------------------------------------

/// Error returned when internal cache invariants are violated.
///
/// Carries a human-readable description of which invariant failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct InvariantError(String);

impl InvariantError {
    /// Creates a new `InvariantError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
