//! Persistent key-value cache for offline support.
//!
//! Every value is stored as a `{ data, timestamp }` envelope under a plain
//! string key. Entries older than the caller's `max_age` are evicted on read.

mod layer;
mod storage;
mod traits;

pub use layer::{KvCache, DEFAULT_MAX_AGE, DEFAULT_PRESERVE_KEYS};
pub use storage::{KeyValueStore, MemoryStore, SqliteStore};
pub use traits::{system_clock, CacheEntry, Cacheable, Clock};
