//! Process-wide online/offline status as an injectable service.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Current network reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityStatus {
  Online,
  Offline,
}

impl ConnectivityStatus {
  pub fn from_online(online: bool) -> Self {
    if online {
      Self::Online
    } else {
      Self::Offline
    }
  }

  pub fn is_online(self) -> bool {
    self == Self::Online
  }
}

/// Something that can tell whether the network is reachable right now.
pub trait ConnectivityProbe: Send + Sync + 'static {
  fn check(&self) -> BoxFuture<'_, bool>;
}

/// Probe that sends a `HEAD` request to the API. Any HTTP response counts
/// as online; a transport error counts as offline.
pub struct HttpProbe {
  client: reqwest::Client,
  url: Url,
}

impl HttpProbe {
  pub fn new(base_url: &Url, path: &str) -> Result<Self> {
    let url = base_url
      .join(path)
      .map_err(|e| eyre!("Invalid probe path {}: {}", path, e))?;
    let client = reqwest::Client::builder()
      .connect_timeout(Duration::from_secs(5))
      .timeout(Duration::from_secs(10))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, url })
  }
}

impl ConnectivityProbe for HttpProbe {
  fn check(&self) -> BoxFuture<'_, bool> {
    Box::pin(async move {
      match self.client.head(self.url.clone()).send().await {
        Ok(_) => true,
        Err(e) => {
          debug!("Connectivity probe to {} failed: {}", self.url, e);
          false
        }
      }
    })
  }
}

/// Owner of the connectivity flag.
///
/// Readers call [`current_status`](Self::current_status) or hold a
/// [`subscribe`](Self::subscribe) receiver; only transitions are published.
pub struct ConnectivityMonitor {
  tx: watch::Sender<ConnectivityStatus>,
  poller: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
  pub fn new(initial: ConnectivityStatus) -> Arc<Self> {
    let (tx, _rx) = watch::channel(initial);
    Arc::new(Self {
      tx,
      poller: Mutex::new(None),
    })
  }

  pub fn current_status(&self) -> ConnectivityStatus {
    *self.tx.borrow()
  }

  pub fn is_online(&self) -> bool {
    self.current_status().is_online()
  }

  pub fn subscribe(&self) -> watch::Receiver<ConnectivityStatus> {
    self.tx.subscribe()
  }

  /// Record a new status. Returns true when it was a transition.
  pub fn set_status(&self, status: ConnectivityStatus) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == status {
        false
      } else {
        *current = status;
        true
      }
    });

    if changed {
      info!("Connectivity changed: {:?}", status);
    }
    changed
  }

  /// Ask `probe` once and record the answer.
  pub async fn refresh(&self, probe: &dyn ConnectivityProbe) -> ConnectivityStatus {
    let status = ConnectivityStatus::from_online(probe.check().await);
    self.set_status(status);
    status
  }

  /// Poll `probe` every `interval` until [`stop`](Self::stop) or drop.
  pub fn start<P: ConnectivityProbe>(self: &Arc<Self>, probe: P, interval: Duration) {
    let monitor: Weak<Self> = Arc::downgrade(self);
    let handle = tokio::spawn(async move {
      loop {
        let online = probe.check().await;
        match monitor.upgrade() {
          Some(monitor) => {
            monitor.set_status(ConnectivityStatus::from_online(online));
          }
          None => break,
        }
        tokio::time::sleep(interval).await;
      }
    });

    match self.poller.lock() {
      Ok(mut poller) => {
        if let Some(previous) = poller.replace(handle) {
          previous.abort();
        }
      }
      Err(e) => {
        warn!("Lock poisoned, connectivity poller not tracked: {}", e);
        handle.abort();
      }
    }
  }

  /// Stop polling. The last known status stays in place.
  pub fn stop(&self) {
    if let Ok(mut poller) = self.poller.lock() {
      if let Some(handle) = poller.take() {
        handle.abort();
        debug!("Connectivity poller stopped");
      }
    }
  }
}

impl Drop for ConnectivityMonitor {
  fn drop(&mut self) {
    self.stop();
  }
}
