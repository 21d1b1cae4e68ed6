//! Install/activate lifecycle and per-request cache policies.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::json;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::cache::HttpCache;
use super::transport::Transport;
use super::types::{CachedResponse, Request, RequestMode};

pub const VERIFY_PREFIX: &str = "/api/verify";
pub const API_PREFIX: &str = "/api/";

pub const OFFLINE_VERIFY_MESSAGE: &str =
  "You're offline. Please connect to the internet to verify this product.";

/// Policy applied to an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// `/api/verify*`: network, then cache, then a synthesized answer
  NetworkFirst,
  /// Static GETs: cache, then network
  CacheFirst,
  /// Not intercepted
  Passthrough,
}

/// Pick the policy for `request`.
pub fn route(request: &Request) -> Route {
  if request.method != Method::GET {
    return Route::Passthrough;
  }
  // Extension and other non-web schemes
  if !matches!(request.url.scheme(), "http" | "https") {
    return Route::Passthrough;
  }

  let path = request.url.path();
  if path.starts_with(VERIFY_PREFIX) {
    Route::NetworkFirst
  } else if path.starts_with(API_PREFIX) || path == "/api" {
    Route::Passthrough
  } else {
    Route::CacheFirst
  }
}

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  /// Current bucket; bump the version to invalidate precached assets
  pub cache_name: String,
  /// Paths fetched and stored at install time
  pub precache: Vec<String>,
  /// Served to navigations that fail with nothing cached
  pub offline_page: String,
  /// Origin the precache paths are resolved against
  pub app_url: Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
  Parsed = 0,
  Installed = 1,
  Activated = 2,
}

impl WorkerState {
  fn from_u8(v: u8) -> Self {
    match v {
      1 => Self::Installed,
      2 => Self::Activated,
      _ => Self::Parsed,
    }
  }
}

/// Transport-level cache sitting between the app and the network.
///
/// Only an activated worker intercepts requests.
pub struct ServiceWorker<C: HttpCache, T: Transport> {
  cache: Arc<C>,
  transport: Arc<T>,
  config: WorkerConfig,
  state: AtomicU8,
}

impl<C: HttpCache, T: Transport> ServiceWorker<C, T> {
  pub fn new(cache: Arc<C>, transport: Arc<T>, config: WorkerConfig) -> Self {
    Self {
      cache,
      transport,
      config,
      state: AtomicU8::new(WorkerState::Parsed as u8),
    }
  }

  pub fn state(&self) -> WorkerState {
    WorkerState::from_u8(self.state.load(Ordering::SeqCst))
  }

  pub fn config(&self) -> &WorkerConfig {
    &self.config
  }

  pub fn cache(&self) -> &C {
    &self.cache
  }

  /// Precache every configured asset. Nothing is stored unless every
  /// asset was fetched with a success status.
  pub async fn install(&self) -> Result<usize> {
    let mut fetched = Vec::with_capacity(self.config.precache.len());

    for path in &self.config.precache {
      let url = self
        .config
        .app_url
        .join(path)
        .map_err(|e| eyre!("Invalid precache path {}: {}", path, e))?;
      let request = Request::get(url);
      let response = self
        .transport
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Failed to precache {}: {}", path, e))?;
      if !response.is_success() {
        return Err(eyre!(
          "Failed to precache {}: status {}",
          path,
          response.status
        ));
      }
      fetched.push((request, response));
    }

    self.cache.open(&self.config.cache_name)?;
    for (request, response) in &fetched {
      self.cache.put(&self.config.cache_name, request, response)?;
    }

    // Skip waiting: installed workers move straight on to activation
    self.state.store(WorkerState::Installed as u8, Ordering::SeqCst);
    info!(
      "Precached {} assets into {}",
      fetched.len(),
      self.config.cache_name
    );
    Ok(fetched.len())
  }

  /// Delete every bucket but the current one and take control.
  pub async fn activate(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.cache.bucket_names()? {
      if name != self.config.cache_name && self.cache.delete_bucket(&name)? {
        info!("Deleted old cache bucket {}", name);
        deleted.push(name);
      }
    }

    self.state.store(WorkerState::Activated as u8, Ordering::SeqCst);
    Ok(deleted)
  }

  /// Pick up a worker activated by an earlier process: if the current
  /// bucket already exists, start intercepting without reinstalling.
  pub fn resume(&self) -> Result<bool> {
    let installed = self
      .cache
      .bucket_names()?
      .iter()
      .any(|name| *name == self.config.cache_name);
    if installed {
      self.state.store(WorkerState::Activated as u8, Ordering::SeqCst);
    }
    Ok(installed)
  }

  /// Handle a fetch. `None` means the request is not intercepted and
  /// should go to the network untouched.
  pub async fn handle_fetch(&self, request: &Request) -> Option<CachedResponse> {
    if self.state() != WorkerState::Activated {
      return None;
    }

    match route(request) {
      Route::Passthrough => None,
      Route::NetworkFirst => Some(self.network_first(request).await),
      Route::CacheFirst => Some(self.cache_first(request).await),
    }
  }

  async fn network_first(&self, request: &Request) -> CachedResponse {
    match self.transport.fetch(request).await {
      Ok(response) => {
        self.store(request, &response);
        response
      }
      Err(e) => {
        debug!("Network failed for {}: {}", request.url, e);
        match self.lookup(request) {
          Some(cached) => cached,
          None => offline_verification_response(),
        }
      }
    }
  }

  async fn cache_first(&self, request: &Request) -> CachedResponse {
    if let Some(cached) = self.lookup(request) {
      return cached;
    }

    match self.transport.fetch(request).await {
      Ok(response) => {
        if response.is_cacheable() {
          self.store(request, &response);
        }
        response
      }
      Err(e) => {
        debug!("Network failed for {}: {}", request.url, e);
        if request.mode == RequestMode::Navigate {
          if let Some(page) = self.offline_page() {
            return page;
          }
        }
        service_unavailable()
      }
    }
  }

  fn offline_page(&self) -> Option<CachedResponse> {
    let url = self.config.app_url.join(&self.config.offline_page).ok()?;
    self.lookup(&Request::get(url))
  }

  fn lookup(&self, request: &Request) -> Option<CachedResponse> {
    match self.cache.match_request(&self.config.cache_name, request) {
      Ok(found) => found,
      Err(e) => {
        warn!("Cache lookup failed for {}: {}", request.url, e);
        None
      }
    }
  }

  fn store(&self, request: &Request, response: &CachedResponse) {
    if let Err(e) = self.cache.put(&self.config.cache_name, request, response) {
      warn!("Failed to cache {}: {}", request.url, e);
    }
  }
}

/// Deterministic "not authenticated" answer for verifications made offline.
pub fn offline_verification_response() -> CachedResponse {
  let body = json!({
    "authenticated": false,
    "message": OFFLINE_VERIFY_MESSAGE,
  });
  CachedResponse::new(200, body.to_string()).with_header("content-type", "application/json")
}

fn service_unavailable() -> CachedResponse {
  CachedResponse::new(503, "Service Unavailable").with_header("content-type", "text/plain")
}
