//! Named cache registry.

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::engine::CacheEngine;
use crate::config::CacheConfig;
use crate::error::{PalError, Result};

/// Type-erased view of a cache so the registry can hold mixed key/value types.
trait NamedCache: Send + Sync {
    fn is_empty(&self) -> bool;
    fn len(&self) -> usize;
    fn shutdown(&self);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<K, V> NamedCache for CacheEngine<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn is_empty(&self) -> bool {
        CacheEngine::is_empty(self)
    }

    fn len(&self) -> usize {
        CacheEngine::len(self)
    }

    fn shutdown(&self) {
        CacheEngine::shutdown(self);
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Owner of independently configured caches, looked up by name.
///
/// Lookups take a shared lock; only creation and removal take it exclusively,
/// and creation re-checks under the exclusive lock so a name is never built
/// twice. Each cache has its own lock, so caches never block each other.
pub struct CacheManager {
    caches: RwLock<HashMap<String, Arc<dyn NamedCache>>>,
    defaults: CacheConfig,
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl CacheManager {
    /// Create a registry whose default caches use `defaults`.
    pub fn new(defaults: CacheConfig) -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            defaults,
        }
    }

    /// Defaults applied by [`get_or_default`](Self::get_or_default).
    pub fn defaults(&self) -> &CacheConfig {
        &self.defaults
    }

    /// Look up `name`, creating it with `capacity` and `ttl` if missing.
    ///
    /// Settings only apply on creation.
    pub fn get_or_create<K, V>(&self, name: &str, capacity: usize, ttl: Duration) -> Result<Arc<CacheEngine<K, V>>>
    where
        K: Eq + Hash + Clone + Send + 'static,
        V: Clone + Send + 'static,
    {
        if let Some(existing) = self.lookup(name) {
            return downcast(name, existing);
        }

        let mut caches = self.caches.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = caches.get(name) {
            return downcast(name, Arc::clone(existing));
        }

        let cache = Arc::new(CacheEngine::<K, V>::new(capacity, ttl));
        caches.insert(name.to_string(), Arc::clone(&cache) as Arc<dyn NamedCache>);
        tracing::debug!("Created cache '{}' (capacity {}, ttl {:?})", name, capacity, ttl);
        Ok(cache)
    }

    /// Look up `name`, creating it with the configured defaults if missing.
    pub fn get_or_default<K, V>(&self, name: &str) -> Result<Arc<CacheEngine<K, V>>>
    where
        K: Eq + Hash + Clone + Send + 'static,
        V: Clone + Send + 'static,
    {
        self.get_or_create(name, self.defaults.capacity, self.defaults.ttl())
    }

    /// Existing cache `name`, if any.
    pub fn get<K, V>(&self, name: &str) -> Result<Option<Arc<CacheEngine<K, V>>>>
    where
        K: Eq + Hash + Clone + Send + 'static,
        V: Clone + Send + 'static,
    {
        self.lookup(name).map(|cache| downcast(name, cache)).transpose()
    }

    /// Register `cache` under `name`, shutting down any cache it replaces.
    ///
    /// Re-registering the cache already held under `name` is a no-op.
    pub fn insert<K, V>(&self, name: impl Into<String>, cache: Arc<CacheEngine<K, V>>)
    where
        K: Eq + Hash + Clone + Send + 'static,
        V: Clone + Send + 'static,
    {
        let incoming = Arc::as_ptr(&cache).cast::<()>();
        let previous = self
            .caches
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), cache);
        if let Some(previous) = previous {
            // Compare data pointers only, the vtable half of `dyn` may differ
            if Arc::as_ptr(&previous).cast::<()>() != incoming {
                previous.shutdown();
            }
        }
    }

    /// Unregister and shut down `name`. Returns whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self
            .caches
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
        match removed {
            Some(cache) => {
                cache.shutdown();
                true
            },
            None => false,
        }
    }

    /// Whether `name` is missing or holds no entries.
    pub fn is_empty(&self, name: &str) -> bool {
        self.lookup(name).map_or(true, |cache| cache.is_empty())
    }

    /// Entry count of `name` (zero when missing).
    pub fn len_of(&self, name: &str) -> usize {
        self.lookup(name).map_or(0, |cache| cache.len())
    }

    /// Whether caching is switched on in the configuration.
    pub fn is_enabled(&self) -> bool {
        self.defaults.enabled
    }

    /// Put one value into `name`, creating the cache with defaults if needed.
    ///
    /// Does nothing when caching is disabled.
    pub fn put_value<K, V>(&self, name: &str, key: K, value: V) -> Result<()>
    where
        K: Eq + Hash + Clone + Send + 'static,
        V: Clone + Send + 'static,
    {
        if !self.defaults.enabled {
            return Ok(());
        }
        self.get_or_default::<K, V>(name)?.put(key, value);
        Ok(())
    }

    /// Registered cache names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .caches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Shut down and unregister every cache.
    pub fn shutdown_all(&self) {
        let drained: Vec<_> = self
            .caches
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (name, cache) in drained {
            tracing::debug!("Shutting down cache '{}'", name);
            cache.shutdown();
        }
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn NamedCache>> {
        self.caches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("caches", &self.names())
            .finish()
    }
}

fn downcast<K, V>(name: &str, cache: Arc<dyn NamedCache>) -> Result<Arc<CacheEngine<K, V>>>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    cache
        .into_any()
        .downcast::<CacheEngine<K, V>>()
        .map_err(|_| PalError::CacheType(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_reuses() {
        let manager = CacheManager::default();
        let first = manager
            .get_or_create::<String, u32>("orders", 8, Duration::from_secs(60))
            .unwrap();
        first.put("a".to_string(), 1);

        // Settings of a later call are ignored
        let second = manager
            .get_or_create::<String, u32>("orders", 2, Duration::from_secs(1))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.capacity(), 8);
        assert_eq!(second.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn test_type_mismatch() {
        let manager = CacheManager::default();
        manager.get_or_default::<String, u32>("orders").unwrap();

        let result = manager.get_or_default::<u64, String>("orders");
        assert!(matches!(result, Err(PalError::CacheType(name)) if name == "orders"));
        assert!(manager.get::<u64, String>("orders").is_err());
    }

    #[test]
    fn test_is_empty_gating() {
        let manager = CacheManager::default();
        assert!(manager.is_empty("pending"));

        manager.put_value("pending", 7u64, "order-7".to_string()).unwrap();
        assert!(!manager.is_empty("pending"));
        assert_eq!(manager.len_of("pending"), 1);
    }

    #[test]
    fn test_disabled_manager_stores_nothing() {
        let manager = CacheManager::new(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        assert!(!manager.is_enabled());
        manager.put_value("pending", 1u8, 1u8).unwrap();
        assert!(manager.is_empty("pending"));
        assert!(manager.names().is_empty());
    }

    #[test]
    fn test_remove_shuts_down() {
        let manager = CacheManager::default();
        let cache = manager.get_or_default::<u8, u8>("tmp").unwrap();
        cache.put(1, 1);

        assert!(manager.remove("tmp"));
        assert!(!manager.remove("tmp"));
        assert!(cache.is_shut_down());
        assert!(manager.get::<u8, u8>("tmp").unwrap().is_none());
    }

    #[test]
    fn test_insert_replaces() {
        let manager = CacheManager::default();
        let old = manager.get_or_default::<u8, u8>("c").unwrap();
        let replacement = Arc::new(CacheEngine::<u8, u8>::new(2, Duration::from_secs(10)));
        manager.insert("c", Arc::clone(&replacement));

        assert!(old.is_shut_down());
        let current = manager.get::<u8, u8>("c").unwrap().unwrap();
        assert!(Arc::ptr_eq(&current, &replacement));
    }

    #[test]
    fn test_reinsert_same_cache_keeps_it_live() {
        let manager = CacheManager::default();
        let cache = Arc::new(CacheEngine::<u8, u8>::new(4, Duration::from_secs(10)));
        manager.insert("a", Arc::clone(&cache));
        manager.insert("a", Arc::clone(&cache));

        assert!(!cache.is_shut_down());
        cache.put(1, 1);
        assert_eq!(cache.get(&1), Some(1));
        assert_eq!(manager.len_of("a"), 1);
    }

    #[test]
    fn test_names_and_shutdown_all() {
        let manager = CacheManager::new(CacheConfig {
            capacity: 4,
            ..CacheConfig::default()
        });
        let b = manager.get_or_default::<u8, u8>("b").unwrap();
        manager.get_or_default::<u8, u8>("a").unwrap();
        assert_eq!(manager.names(), vec!["a", "b"]);
        assert_eq!(b.capacity(), 4);

        manager.shutdown_all();
        assert!(manager.names().is_empty());
        assert!(b.is_shut_down());
    }

    #[test]
    fn test_concurrent_creation_single_instance() {
        let manager = Arc::new(CacheManager::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || manager.get_or_default::<u32, u32>("shared").unwrap())
            })
            .collect();
        let caches: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(caches.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }
}
