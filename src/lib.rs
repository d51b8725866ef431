//! shardcache: an in-process, size-bounded key/value cache split into
//! independently locked shards, with pluggable eviction policies and TTL
//! expiry.
//!
//! See `DESIGN.md` for internal architecture and invariants.

pub mod builder;
pub mod cell;
pub mod ds;
pub mod error;
pub mod expiry;
pub mod policy;
pub mod prelude;
pub mod store;
