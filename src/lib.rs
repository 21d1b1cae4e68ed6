//! Offline-first data access for the Indalo product authenticity app.
//!
//! Two independent cache layers:
//! - [`cache`] + [`offline_data`]: per-resource JSON values under string
//!   keys, age-checked on read, written through after every successful fetch
//! - [`worker`]: whole HTTP responses keyed by request, versioned by bucket
//!
//! They never read each other's entries. The key-value layer is authoritative
//! for data a consumer asked for by key; the worker layer only decides what
//! a single request returns when the network is unavailable.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod offline_data;
pub mod sync;
pub mod worker;
