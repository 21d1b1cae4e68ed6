//! Offline-aware data access for a single named resource.
//!
//! Online: fetch, write through to the key-value cache, fall back to the
//! cache if the fetch fails. Offline: read the cache only.

mod fetch;
mod resource;
mod state;

pub use fetch::load;
pub use resource::OfflineResource;
pub use state::{OfflineDataError, OfflineDataState};
