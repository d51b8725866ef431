pub use crate::builder::{Cache, CacheBuilder, CacheConfig};
pub use crate::cell::CacheCell;
pub use crate::error::{CacheError, ConfigError, InvariantError};
pub use crate::policy::EvictionPolicy;
pub use crate::store::{CacheMetrics, EntryOptions};
