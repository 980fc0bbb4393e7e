//! In-memory response cache.
//!
//! Entries are keyed by logical endpoint (or an explicit cache key), expire
//! after a per-entry TTL, and are swept periodically so keys that are written
//! but never read again do not accumulate.

mod store;

pub use store::{CacheEntry, CacheStore, SweeperHandle};
