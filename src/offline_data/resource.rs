//! Long-lived offline-aware resource that reacts to connectivity changes.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::{Cacheable, KeyValueStore, KvCache};
use crate::connectivity::{ConnectivityMonitor, ConnectivityStatus};

use super::fetch::load;
use super::state::OfflineDataState;

/// A single named resource kept in sync with the network when possible.
///
/// Spawning starts a load immediately. Going online re-fetches; going
/// offline only flips `is_offline` and keeps the current data. Dropping the
/// resource aborts its task, which also drops any in-flight fetch.
pub struct OfflineResource<T> {
  key: String,
  rx: watch::Receiver<OfflineDataState<T>>,
  task: JoinHandle<()>,
}

impl<T: Cacheable> OfflineResource<T> {
  pub fn spawn<S, F, Fut>(
    cache: KvCache<S>,
    connectivity: Arc<ConnectivityMonitor>,
    key: impl Into<String>,
    fetch: F,
    max_age: Duration,
  ) -> Self
  where
    S: KeyValueStore + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let key = key.into();
    let mut status_rx = connectivity.subscribe();
    let initial = *status_rx.borrow_and_update();
    let (tx, rx) = watch::channel(OfflineDataState::loading(!initial.is_online()));

    let task_key = key.clone();
    let task = tokio::spawn(async move {
      let state = load(&cache, initial, &task_key, &fetch, max_age).await;
      tx.send_replace(state);

      // Monitor gone means no more transitions; the last state stands.
      while status_rx.changed().await.is_ok() {
        let status = *status_rx.borrow_and_update();
        match status {
          ConnectivityStatus::Online => {
            debug!("Back online, refetching {}", task_key);
            tx.send_modify(|state| {
              state.is_loading = true;
              state.error = None;
              state.is_offline = false;
            });
            let state = load(&cache, status, &task_key, &fetch, max_age).await;
            tx.send_replace(state);
          }
          ConnectivityStatus::Offline => {
            tx.send_modify(|state| state.is_offline = true);
          }
        }
      }
    });

    Self { key, rx, task }
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  /// Current snapshot.
  pub fn state(&self) -> OfflineDataState<T> {
    self.rx.borrow().clone()
  }

  /// Receiver that is notified on every state change.
  pub fn subscribe(&self) -> watch::Receiver<OfflineDataState<T>> {
    self.rx.clone()
  }

  /// Wait for the next state change.
  pub async fn changed(&mut self) -> Option<OfflineDataState<T>> {
    self.rx.changed().await.ok()?;
    Some(self.rx.borrow_and_update().clone())
  }

  /// Wait until no load is in progress.
  pub async fn settled(&mut self) -> OfflineDataState<T> {
    if self.rx.wait_for(|state| !state.is_loading).await.is_err() {
      debug!("Loader for {} stopped before settling", self.key);
    }
    self.rx.borrow().clone()
  }
}

impl<T> Drop for OfflineResource<T> {
  fn drop(&mut self) {
    self.task.abort();
  }
}
