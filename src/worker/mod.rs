//! Transport-level response cache, modelled on a browser service worker.
//!
//! - install: precache a fixed asset list into the current bucket
//! - activate: drop every other bucket and start intercepting
//! - fetch: network-first for `/api/verify*`, cache-first for static GETs,
//!   everything else passes through
//!
//! This cache is keyed by request and versioned by bucket name. It does not
//! share entries with the key-value cache in [`crate::cache`].

mod cache;
mod strategy;
mod transport;
mod types;

pub use cache::{HttpCache, MemoryHttpCache, SqliteHttpCache};
pub use strategy::{
  offline_verification_response, route, Route, ServiceWorker, WorkerConfig, WorkerState,
  OFFLINE_VERIFY_MESSAGE,
};
pub use transport::{ReqwestTransport, Transport};
pub use types::{CachedResponse, Request, RequestMode, ResponseKind};
