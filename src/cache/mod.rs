//! Session-scoped caches.
//!
//! [`CacheEngine`] is a single keyed store bounded by capacity and sliding
//! TTL. [`CacheManager`] holds many of them by name with independent
//! settings. Neither depends on the session or transport layers.

mod engine;
mod manager;

pub use engine::{CacheEngine, DEFAULT_CAPACITY, DEFAULT_TTL};
pub use manager::CacheManager;
