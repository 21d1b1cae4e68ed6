//! One pass of "try network, fall back to cache".

use color_eyre::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{Cacheable, KeyValueStore, KvCache};
use crate::connectivity::ConnectivityStatus;

use super::state::{OfflineDataError, OfflineDataState};

/// Load `key` once according to `status`.
///
/// 1. Offline - read the cache, never call `fetch`
/// 2. Online - call `fetch` and write the result through to the cache
/// 3. Fetch failed - serve the cache with a warning, or surface the error
pub async fn load<S, T, F, Fut>(
  cache: &KvCache<S>,
  status: ConnectivityStatus,
  key: &str,
  fetch: F,
  max_age: Duration,
) -> OfflineDataState<T>
where
  S: KeyValueStore,
  T: Cacheable,
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  if !status.is_online() {
    return match cache.get::<T>(key, max_age) {
      Some(data) => {
        debug!("Offline, serving {} from cache", key);
        OfflineDataState::ready(data, true)
      }
      None => OfflineDataState::degraded(None, &OfflineDataError::OfflineNoCache, true),
    };
  }

  match fetch().await {
    Ok(data) => {
      cache.put(key, &data);
      OfflineDataState::ready(data, false)
    }
    Err(e) => {
      let cause = e.to_string();
      warn!("Fetch for {} failed: {}", key, cause);

      match cache.get::<T>(key, max_age) {
        Some(cached) => OfflineDataState::degraded(
          Some(cached),
          &OfflineDataError::FetchFailedWithCacheFallback { cause },
          false,
        ),
        None => {
          OfflineDataState::degraded(None, &OfflineDataError::FetchFailedNoFallback(cause), false)
        }
      }
    }
  }
}
