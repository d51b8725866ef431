//! Lazily initialized cache handle for use in statics.
//!
//! ```
//! use shardcache::builder::CacheBuilder;
//! use shardcache::cell::CacheCell;
//! use shardcache::error::CacheError;
//!
//! static CACHE: CacheCell<String> = CacheCell::new();
//!
//! assert_eq!(CACHE.get("k").unwrap_err(), CacheError::NotInitialized);
//! CACHE.init(CacheBuilder::new(4, 4096)).unwrap();
//! CACHE.set("k", "v".to_string()).unwrap();
//! assert_eq!(*CACHE.get("k").unwrap(), "v");
//! ```

use std::sync::{Arc, OnceLock};

use crate::builder::{Cache, CacheBuilder};
use crate::error::{CacheError, ConfigError, Result};

/// A cache that is built on first `init` and reports
/// [`CacheError::NotInitialized`] until then.
#[derive(Debug)]
pub struct CacheCell<V> {
    cache: OnceLock<Cache<V>>,
}

impl<V> CacheCell<V> {
    pub const fn new() -> Self {
        Self {
            cache: OnceLock::new(),
        }
    }

    /// The cache, if `init` has succeeded.
    pub fn handle(&self) -> Option<&Cache<V>> {
        self.cache.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.cache.get().is_some()
    }

    fn cache(&self) -> Result<&Cache<V>> {
        self.cache.get().ok_or(CacheError::NotInitialized)
    }

    pub fn set(&self, key: &str, value: V) -> Result<()> {
        self.cache()?.set(key, value)
    }

    pub fn get(&self, key: &str) -> Result<Arc<V>> {
        self.cache()?.get(key)
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.cache()?.delete(key))
    }
}

impl<V> CacheCell<V>
where
    V: Send + Sync + 'static,
{
    /// Builds the cache from `builder` unless it already exists.
    ///
    /// Later calls return the existing cache and ignore their builder.
    pub fn init(&self, builder: CacheBuilder<V>) -> std::result::Result<&Cache<V>, ConfigError> {
        if let Some(cache) = self.cache.get() {
            return Ok(cache);
        }
        let cache = builder.try_build()?;
        // A racing `init` may have won; its cache is kept and ours dropped.
        Ok(self.cache.get_or_init(|| cache))
    }
}

impl<V> Default for CacheCell<V> {
    fn default() -> Self {
        Self::new()
    }
}
