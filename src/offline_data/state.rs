//! State published to consumers of offline-aware data.

use serde::Serialize;

/// Snapshot of one resource as seen by a consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineDataState<T> {
  pub data: Option<T>,
  pub is_loading: bool,
  pub error: Option<String>,
  pub is_offline: bool,
}

impl<T> OfflineDataState<T> {
  /// Initial state before the first load finishes.
  pub fn loading(is_offline: bool) -> Self {
    Self {
      data: None,
      is_loading: true,
      error: None,
      is_offline,
    }
  }

  pub(crate) fn ready(data: T, is_offline: bool) -> Self {
    Self {
      data: Some(data),
      is_loading: false,
      error: None,
      is_offline,
    }
  }

  pub(crate) fn degraded(data: Option<T>, error: &OfflineDataError, is_offline: bool) -> Self {
    Self {
      data,
      is_loading: false,
      error: Some(error.to_string()),
      is_offline,
    }
  }
}

/// Failure modes of a load. The `Display` text is what consumers show.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OfflineDataError {
  /// Offline at start and nothing usable in the cache.
  #[error("You are offline and there is no cached data available")]
  OfflineNoCache,

  /// Network failed but cached data was served instead. Soft warning.
  #[error("Using cached data due to fetch error")]
  FetchFailedWithCacheFallback { cause: String },

  /// Network failed and there was nothing to fall back to.
  #[error("{0}")]
  FetchFailedNoFallback(String),
}

impl OfflineDataError {
  /// Whether the consumer still has data to show.
  pub fn is_soft(&self) -> bool {
    matches!(self, Self::FetchFailedWithCacheFallback { .. })
  }
}
