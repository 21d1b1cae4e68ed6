//! Timestamped key-value cache with age-based eviction on read.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::storage::KeyValueStore;
use super::traits::{system_clock, CacheEntry, Clock};

/// Default maximum age of a cached entry (1 hour).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Keys that survive a full `clear(None)` unless configured otherwise.
pub const DEFAULT_PRESERVE_KEYS: [&str; 2] = ["theme", "user"];

/// Best-effort cache over a [`KeyValueStore`].
///
/// Writes never fail from the caller's point of view: storage and
/// serialization errors are logged and dropped. Reads treat anything
/// unusable as a miss.
pub struct KvCache<S: KeyValueStore> {
  storage: Arc<S>,
  preserve_keys: BTreeSet<String>,
  clock: Clock,
}

impl<S: KeyValueStore> KvCache<S> {
  /// Create a new cache over the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      preserve_keys: DEFAULT_PRESERVE_KEYS.iter().map(|k| k.to_string()).collect(),
      clock: system_clock(),
    }
  }

  /// Replace the set of keys kept by `clear(None)`.
  pub fn with_preserve_keys<I, K>(mut self, keys: I) -> Self
  where
    I: IntoIterator<Item = K>,
    K: Into<String>,
  {
    self.preserve_keys = keys.into_iter().map(Into::into).collect();
    self
  }

  /// Use a custom clock for write timestamps and age checks.
  pub fn with_clock(mut self, clock: Clock) -> Self {
    self.clock = clock;
    self
  }

  /// Keys kept by `clear(None)`.
  pub fn preserve_keys(&self) -> &BTreeSet<String> {
    &self.preserve_keys
  }

  /// Underlying storage, for inspection.
  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Write `value` under `key` stamped with the current time.
  pub fn put<T: Serialize>(&self, key: &str, value: &T) {
    let entry = CacheEntry::new(value, (self.clock)());

    let raw = match serde_json::to_string(&entry) {
      Ok(raw) => raw,
      Err(e) => {
        warn!("Failed to serialize cache entry {}: {}", key, e);
        return;
      }
    };

    if let Err(e) = self.storage.set_raw(key, &raw) {
      warn!("Failed to cache data for {}: {}", key, e);
    }
  }

  /// Read `key` if present and no older than `max_age`.
  ///
  /// A stale entry is removed before `None` is returned.
  pub fn get<T: DeserializeOwned>(&self, key: &str, max_age: Duration) -> Option<T> {
    let raw = match self.storage.get_raw(key) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!("Failed to read cached data for {}: {}", key, e);
        return None;
      }
    };

    let entry: CacheEntry<T> = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        debug!("Ignoring unparsable cache entry {}: {}", key, e);
        return None;
      }
    };

    let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
    if entry.age_millis((self.clock)()) > max_age_ms {
      debug!("Evicting stale cache entry {}", key);
      if let Err(e) = self.storage.remove(key) {
        warn!("Failed to evict stale entry {}: {}", key, e);
      }
      return None;
    }

    Some(entry.data)
  }

  /// Remove `key`, or everything except the preserved keys when `None`.
  pub fn clear(&self, key: Option<&str>) {
    match key {
      Some(key) => {
        if let Err(e) = self.storage.remove(key) {
          warn!("Failed to clear cache entry {}: {}", key, e);
        }
      }
      None => self.clear_except(&self.preserve_keys),
    }
  }

  /// Remove every entry whose key is not in `preserve`.
  pub fn clear_except(&self, preserve: &BTreeSet<String>) {
    if let Err(e) = self.storage.retain_only(preserve) {
      warn!("Failed to clear cache: {}", e);
    }
  }
}

impl<S: KeyValueStore> Clone for KvCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      preserve_keys: self.preserve_keys.clone(),
      clock: Arc::clone(&self.clock),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStore;
  use chrono::{DateTime, TimeZone, Utc};
  use color_eyre::{eyre::eyre, Result};
  use std::sync::atomic::{AtomicI64, Ordering};

  /// Clock that only moves when told to.
  fn manual_clock(start_ms: i64) -> (Clock, Arc<AtomicI64>) {
    let now = Arc::new(AtomicI64::new(start_ms));
    let handle = Arc::clone(&now);
    let clock: Clock = Arc::new(move || -> DateTime<Utc> {
      Utc
        .timestamp_millis_opt(handle.load(Ordering::SeqCst))
        .single()
        .unwrap_or_default()
    });
    (clock, now)
  }

  #[test]
  fn test_put_then_get_round_trip() {
    let cache = KvCache::new(MemoryStore::new());
    let products = vec!["Castle Lager".to_string(), "Amarula".to_string()];

    cache.put("products", &products);
    let cached: Option<Vec<String>> = cache.get("products", DEFAULT_MAX_AGE);

    assert_eq!(cached, Some(products));
  }

  #[test]
  fn test_missing_key_is_none() {
    let cache = KvCache::new(MemoryStore::new());
    assert_eq!(cache.get::<u32>("nothing", DEFAULT_MAX_AGE), None);
  }

  #[test]
  fn test_stale_entry_is_evicted() {
    let (clock, now) = manual_clock(1_000_000);
    let cache = KvCache::new(MemoryStore::new()).with_clock(clock);
    let max_age = Duration::from_secs(60);

    cache.put("alerts", &3u32);

    // Exactly max_age old is still fresh
    now.store(1_000_000 + 60_000, Ordering::SeqCst);
    assert_eq!(cache.get::<u32>("alerts", max_age), Some(3));

    now.store(1_000_000 + 60_001, Ordering::SeqCst);
    assert_eq!(cache.get::<u32>("alerts", max_age), None);
    assert_eq!(cache.storage().get_raw("alerts").unwrap(), None);
  }

  #[test]
  fn test_unparsable_entry_is_none() {
    let cache = KvCache::new(MemoryStore::new());
    cache.storage().set_raw("broken", "{not json").unwrap();
    cache.put("number", &5u32);

    assert_eq!(cache.get::<u32>("broken", DEFAULT_MAX_AGE), None);
    // Wrong shape for the caller's type is a miss too
    assert_eq!(cache.get::<Vec<String>>("number", DEFAULT_MAX_AGE), None);
  }

  #[test]
  fn test_clear_all_keeps_theme_and_user() {
    let cache = KvCache::new(MemoryStore::new());
    for key in ["theme", "user", "products", "alerts", "analytics"] {
      cache.put(key, &key);
    }

    cache.clear(None);

    assert_eq!(cache.storage().keys().unwrap(), vec!["theme", "user"]);
    assert_eq!(
      cache.get::<String>("theme", DEFAULT_MAX_AGE).as_deref(),
      Some("theme")
    );
  }

  #[test]
  fn test_clear_single_key() {
    let cache = KvCache::new(MemoryStore::new());
    cache.put("products", &1u8);
    cache.put("alerts", &2u8);

    cache.clear(Some("products"));

    assert_eq!(cache.storage().keys().unwrap(), vec!["alerts"]);
  }

  #[test]
  fn test_custom_preserve_keys() {
    let cache = KvCache::new(MemoryStore::new()).with_preserve_keys(["session"]);
    for key in ["theme", "user", "session"] {
      cache.put(key, &0u8);
    }

    cache.clear(None);

    assert_eq!(cache.storage().keys().unwrap(), vec!["session"]);
  }

  struct FailingStore;

  impl KeyValueStore for FailingStore {
    fn get_raw(&self, _key: &str) -> Result<Option<String>> {
      Err(eyre!("disk unavailable"))
    }

    fn set_raw(&self, _key: &str, _value: &str) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }

    fn remove(&self, _key: &str) -> Result<()> {
      Err(eyre!("disk unavailable"))
    }

    fn keys(&self) -> Result<Vec<String>> {
      Err(eyre!("disk unavailable"))
    }
  }

  #[test]
  fn test_storage_failures_are_swallowed() {
    let cache = KvCache::new(FailingStore);

    cache.put("products", &vec![1, 2, 3]);
    cache.clear(None);
    cache.clear(Some("products"));
    assert_eq!(cache.get::<Vec<i32>>("products", DEFAULT_MAX_AGE), None);
  }
}
