//! Core traits and types for the key-value cache.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;

/// Values that can be written through the cache and handed to async tasks.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Cacheable for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Persisted envelope: `{ "data": <value>, "timestamp": <epoch-ms> }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub data: T,
  /// Write time in milliseconds since the Unix epoch
  pub timestamp: i64,
}

impl<T> CacheEntry<T> {
  pub fn new(data: T, written_at: DateTime<Utc>) -> Self {
    Self {
      data,
      timestamp: written_at.timestamp_millis(),
    }
  }

  /// Age of the entry in milliseconds relative to `now`.
  pub fn age_millis(&self, now: DateTime<Utc>) -> i64 {
    now.timestamp_millis() - self.timestamp
  }
}

/// Source of "now" for age checks.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Wall clock.
pub fn system_clock() -> Clock {
  Arc::new(Utc::now)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_entry_wire_format() {
    let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
    let entry = CacheEntry::new(vec!["a", "b"], at);

    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(
      json,
      serde_json::json!({ "data": ["a", "b"], "timestamp": 1_700_000_000_123i64 })
    );
  }

  #[test]
  fn test_entry_age() {
    let at = Utc.timestamp_millis_opt(10_000).unwrap();
    let entry = CacheEntry::new(1, at);
    let later = Utc.timestamp_millis_opt(12_500).unwrap();
    assert_eq!(entry.age_millis(later), 2_500);
  }
}
