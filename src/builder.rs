//! Cache configuration and the shared cache handle.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use shardcache::builder::CacheBuilder;
//! use shardcache::policy::EvictionPolicy;
//! use shardcache::store::EntryOptions;
//!
//! let cache = CacheBuilder::<String>::new(4, 1024)
//!     .policy(EvictionPolicy::Lru)
//!     .build();
//!
//! cache.set("greeting", "hello".to_string()).unwrap();
//! assert_eq!(*cache.get("greeting").unwrap(), "hello");
//!
//! cache
//!     .set_with("session", "abc".to_string(), EntryOptions::new().ttl(Duration::from_secs(30)))
//!     .unwrap();
//! assert!(cache.delete("session"));
//! ```

use std::fmt::{self, Debug, Write};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{ConfigError, InvariantError, Result};
use crate::expiry::{DEFAULT_SWEEP_INTERVAL, ExpiryWorker};
use crate::policy::EvictionPolicy;
use crate::store::entry::EntryOptions;
use crate::store::metrics::CacheMetrics;
use crate::store::sharded::{ShardStore, Weigher};

/// Plain cache configuration, for hosts that load settings themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub shard_count: usize,
    /// Capacity of each shard in bytes.
    pub shard_size: usize,
    /// `None` rejects writes to a full shard instead of evicting.
    pub policy: Option<EvictionPolicy>,
    pub sweep_interval: Duration,
}

impl CacheConfig {
    pub fn new(shard_count: usize, shard_size: usize) -> Self {
        Self {
            shard_count,
            shard_size,
            policy: None,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.shard_count == 0 {
            return Err(ConfigError::ZeroShards);
        }
        if self.shard_size == 0 {
            return Err(ConfigError::ZeroShardSize);
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }
        Ok(())
    }
}

/// Builder for [`Cache`] instances.
///
/// [`new`](Self::new) weighs values by their `Debug` rendering; types
/// without `Debug` start from [`with_weigher`](Self::with_weigher).
pub struct CacheBuilder<V> {
    config: CacheConfig,
    weigher: Weigher<V>,
}

impl<V> CacheBuilder<V>
where
    V: Debug + 'static,
{
    /// Starts a configuration with `shard_count` shards of `shard_size`
    /// bytes each, no eviction policy and a one second sweep interval.
    pub fn new(shard_count: usize, shard_size: usize) -> Self {
        Self::from_config(CacheConfig::new(shard_count, shard_size))
    }

    pub fn from_config(config: CacheConfig) -> Self {
        Self {
            config,
            weigher: Box::new(debug_len::<V>),
        }
    }
}

impl<V> CacheBuilder<V> {
    /// Like [`new`](Self::new), sizing values with `weigher`.
    pub fn with_weigher<F>(shard_count: usize, shard_size: usize, weigher: F) -> Self
    where
        F: Fn(&V) -> usize + Send + Sync + 'static,
    {
        Self::from_config_with_weigher(CacheConfig::new(shard_count, shard_size), weigher)
    }

    pub fn from_config_with_weigher<F>(config: CacheConfig, weigher: F) -> Self
    where
        F: Fn(&V) -> usize + Send + Sync + 'static,
    {
        Self {
            config,
            weigher: Box::new(weigher),
        }
    }

    pub fn policy(mut self, policy: EvictionPolicy) -> Self {
        self.config.policy = Some(policy);
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Replaces the size estimate for values.
    pub fn weigher<F>(mut self, weigher: F) -> Self
    where
        F: Fn(&V) -> usize + Send + Sync + 'static,
    {
        self.weigher = Box::new(weigher);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl<V> CacheBuilder<V>
where
    V: Send + Sync + 'static,
{
    /// Builds the cache and starts its expiry worker.
    pub fn try_build(self) -> std::result::Result<Cache<V>, ConfigError> {
        self.config.validate()?;
        let config = self.config;

        let store = Arc::new(ShardStore::new(
            config.shard_count,
            config.shard_size,
            config.policy,
            self.weigher,
        ));
        let worker = match ExpiryWorker::spawn(Arc::downgrade(&store), config.sweep_interval) {
            Ok(worker) => Some(worker),
            Err(err) => {
                warn!(error = %err, "failed to spawn expiry worker, expired entries are only hidden on read");
                None
            },
        };

        info!(
            shard_count = config.shard_count,
            shard_size = config.shard_size,
            policy = ?config.policy,
            "cache built"
        );
        Ok(Cache {
            inner: Arc::new(CacheInner { store, worker }),
        })
    }

    /// Builds the cache.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid; use
    /// [`try_build`](Self::try_build) to handle that case.
    pub fn build(self) -> Cache<V> {
        match self.try_build() {
            Ok(cache) => cache,
            Err(err) => panic!("invalid cache configuration: {err}"),
        }
    }
}

impl<V> Debug for CacheBuilder<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn debug_len<V: Debug>(value: &V) -> usize {
    struct Counter(usize);

    impl Write for Counter {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.0 += s.len();
            Ok(())
        }
    }

    let mut counter = Counter(0);
    let _ = write!(counter, "{value:?}");
    counter.0
}

/// Shared, thread-safe handle to a sharded cache.
///
/// Clones share the same storage. The expiry worker stops when the last
/// clone is dropped.
pub struct Cache<V> {
    inner: Arc<CacheInner<V>>,
}

struct CacheInner<V> {
    store: Arc<ShardStore<V>>,
    // Declared after `store` so the store is released before the sweeper is joined.
    worker: Option<ExpiryWorker>,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Cache<V> {
    /// Stores `value` under `key` with default options.
    pub fn set(&self, key: &str, value: V) -> Result<()> {
        self.set_with(key, value, EntryOptions::default())
    }

    /// Stores `value` under `key` with an eviction cost and/or expiry.
    pub fn set_with(&self, key: &str, value: V, options: EntryOptions) -> Result<()> {
        self.inner.store.set(key, value, options)
    }

    pub fn get(&self, key: &str) -> Result<Arc<V>> {
        self.inner.store.get(key)
    }

    /// Removes `key`; returns false if it was not present.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.store.delete(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.store.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    pub fn clear(&self) {
        self.inner.store.clear();
    }

    pub fn shard_count(&self) -> usize {
        self.inner.store.shard_count()
    }

    pub fn shard_size(&self) -> usize {
        self.inner.store.shard_size()
    }

    /// Free bytes left in `shard`.
    pub fn shard_volume(&self, shard: usize) -> usize {
        self.inner.store.shard_volume(shard)
    }

    /// Shard that `key` is routed to.
    pub fn shard_for_key(&self, key: &str) -> usize {
        self.inner.store.shard_for_key(key)
    }

    pub fn policy(&self) -> Option<EvictionPolicy> {
        self.inner.store.policy()
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.inner.store.metrics()
    }

    pub fn check_invariants(&self) -> std::result::Result<(), InvariantError> {
        self.inner.store.check_invariants()
    }
}

impl<V> Debug for Cache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("store", &self.inner.store)
            .field("expiry_worker", &self.inner.worker.is_some())
            .finish()
    }
}
