//! Capacity-bounded cache with sliding TTL.
//!
//! # Eviction Order
//!
//! Every entry has one deadline, `expires_at`, refreshed to `now + ttl` by
//! both `get` and `put`. The expiry index orders entries by that deadline, so
//! the entry with the earliest deadline is also the least recently touched:
//!
//! ```text
//! entries: HashMap<K, Slot { value, expires_at, seq }>
//! order:   BTreeMap<(expires_at, seq), K>   ── first() = next to evict
//! ```
//!
//! Both maps live under one mutex and are updated together. `seq` is a
//! per-write counter that keeps keys with equal deadlines in touch order.
//!
//! # Sweeping
//!
//! A background thread wakes every `ttl` and drops every entry whose
//! deadline has passed, whether or not anyone reads it again.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default maximum number of entries
pub const DEFAULT_CAPACITY: usize = 64;

/// Default sliding TTL
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(10);

struct Slot<V> {
    value: V,
    expires_at: Instant,
    seq: u64,
}

struct State<K, V> {
    entries: HashMap<K, Slot<V>>,
    order: BTreeMap<(Instant, u64), K>,
    next_seq: u64,
    latest: Option<K>,
    closed: bool,
}

impl<K: Eq + Hash + Clone, V> State<K, V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            latest: None,
            closed: false,
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&(slot.expires_at, slot.seq));
        Some(slot.value)
    }

    fn evict_earliest(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let mut purged = 0;
        while let Some(entry) = self.order.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let key = entry.remove();
            self.entries.remove(&key);
            purged += 1;
        }
        purged
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.latest = None;
    }
}

// Dropping `stop` also ends the thread (Disconnected)
struct Sweeper {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Keyed store bounded by entry count and time since last touch.
///
/// All operations on one engine take the same lock. Values are cloned out
/// so no lock is held by callers.
pub struct CacheEngine<K, V> {
    capacity: usize,
    ttl: Duration,
    state: Arc<Mutex<State<K, V>>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<K, V> CacheEngine<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create an engine and start its sweeper.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let state = Arc::new(Mutex::new(State::new()));
        let sweeper = spawn_sweeper(Arc::clone(&state), ttl.max(MIN_SWEEP_PERIOD));

        Self {
            capacity: capacity.max(1),
            ttl,
            state,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// 64 entries, 5 minute TTL.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    fn lock(&self) -> MutexGuard<'_, State<K, V>> {
        lock_state(&self.state)
    }

    /// Maximum number of live entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sliding TTL applied on every touch.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up `key`, extending its deadline on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.lock();
        let now = Instant::now();

        let (old, value) = {
            let slot = state.entries.get(key)?;
            if now >= slot.expires_at {
                return None;
            }
            ((slot.expires_at, slot.seq), slot.value.clone())
        };

        let seq = state.next_seq();
        let expires_at = now + self.ttl;
        state.order.remove(&old);
        state.order.insert((expires_at, seq), key.clone());
        if let Some(slot) = state.entries.get_mut(key) {
            slot.expires_at = expires_at;
            slot.seq = seq;
        }
        Some(value)
    }

    /// Insert or replace `key`.
    ///
    /// When a new key would exceed capacity, the entry with the earliest
    /// deadline is evicted first.
    pub fn put(&self, key: K, value: V) {
        let mut state = self.lock();
        if state.closed {
            return;
        }

        state.remove(&key);
        if state.entries.len() >= self.capacity {
            if let Some(evicted) = state.evict_earliest() {
                if state.latest.as_ref() == Some(&evicted) {
                    state.latest = None;
                }
            }
        }

        let seq = state.next_seq();
        let expires_at = Instant::now() + self.ttl;
        state.order.insert((expires_at, seq), key.clone());
        state.entries.insert(
            key.clone(),
            Slot {
                value,
                expires_at,
                seq,
            },
        );
        state.latest = Some(key);
    }

    /// Most recently written entry, if it is still present.
    pub fn peek(&self) -> Option<(K, V)> {
        let state = self.lock();
        let key = state.latest.as_ref()?;
        state
            .entries
            .get(key)
            .map(|slot| (key.clone(), slot.value.clone()))
    }

    /// Remove `key`, returning its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut state = self.lock();
        if state.latest.as_ref() == Some(key) {
            state.latest = None;
        }
        state.remove(key)
    }

    /// Stored entries, including expired ones the sweeper has not reached.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Whether the next new key would trigger an eviction.
    pub fn is_full(&self) -> bool {
        self.lock().entries.len() >= self.capacity
    }

    /// Values of all live entries, in no particular order.
    pub fn values(&self) -> Vec<V> {
        let now = Instant::now();
        self.lock()
            .entries
            .values()
            .filter(|slot| slot.expires_at > now)
            .map(|slot| slot.value.clone())
            .collect()
    }

    /// Key/value pairs of all live entries, in no particular order.
    pub fn entries(&self) -> Vec<(K, V)> {
        let now = Instant::now();
        self.lock()
            .entries
            .iter()
            .filter(|(_, slot)| slot.expires_at > now)
            .map(|(key, slot)| (key.clone(), slot.value.clone()))
            .collect()
    }

    /// Drop every expired entry now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.lock().purge_expired(Instant::now())
    }

    /// Stop the sweeper and clear all entries.
    ///
    /// Afterwards `put` is ignored and `get` finds nothing.
    pub fn shutdown(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.clear();
        }

        let sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.stop.send(());
            if sweeper.handle.join().is_err() {
                tracing::error!("Cache sweeper panicked");
            }
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.lock().closed
    }
}

impl<K, V> std::fmt::Debug for CacheEngine<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = lock_state(&self.state).entries.len();
        f.debug_struct("CacheEngine")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("len", &len)
            .finish()
    }
}

fn lock_state<K, V>(state: &Mutex<State<K, V>>) -> MutexGuard<'_, State<K, V>> {
    // Every mutation above leaves both maps consistent before it can panic
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn spawn_sweeper<K, V>(state: Arc<Mutex<State<K, V>>>, period: Duration) -> Option<Sweeper>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    let (stop, wake) = mpsc::channel::<()>();
    let spawned = thread::Builder::new()
        .name("palwire-cache-sweep".to_string())
        .spawn(move || loop {
            match wake.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => {
                    let purged = lock_state(&state).purge_expired(Instant::now());
                    if purged > 0 {
                        tracing::trace!("Cache sweep removed {} entries", purged);
                    }
                },
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

    match spawned {
        Ok(handle) => Some(Sweeper { stop, handle }),
        Err(e) => {
            tracing::warn!("Cache sweeper could not start ({}), expiry is lazy only", e);
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let cache = CacheEngine::new(4, Duration::from_secs(60));
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"missing"), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_capacity_evicts_earliest_inserted() {
        let cache = CacheEngine::new(3, Duration::from_secs(60));
        for key in 1..=4 {
            cache.put(key, key * 10);
        }

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&1), None);
        for key in 2..=4 {
            assert_eq!(cache.get(&key), Some(key * 10));
        }
    }

    #[test]
    fn test_get_protects_from_eviction() {
        let cache = CacheEngine::new(2, Duration::from_secs(60));
        cache.put("old", 1);
        cache.put("mid", 2);
        assert_eq!(cache.get(&"old"), Some(1));

        cache.put("new", 3);
        assert_eq!(cache.get(&"mid"), None);
        assert_eq!(cache.get(&"old"), Some(1));
        assert_eq!(cache.get(&"new"), Some(3));
    }

    #[test]
    fn test_replace_at_capacity_does_not_evict() {
        let cache = CacheEngine::new(2, Duration::from_secs(60));
        cache.put("a", 1);
        cache.put("b", 2);
        assert!(cache.is_full());

        cache.put("a", 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn test_ttl_expiry_and_sweep() {
        let cache = CacheEngine::new(8, Duration::from_millis(40));
        cache.put("k", "v");
        thread::sleep(Duration::from_millis(60));

        assert_eq!(cache.get(&"k"), None);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(cache.len(), 0, "sweeper should have removed the entry");
    }

    #[test]
    fn test_sliding_expiry() {
        let cache = CacheEngine::new(8, Duration::from_millis(150));
        cache.put("k", 1);
        for _ in 0..4 {
            thread::sleep(Duration::from_millis(60));
            assert_eq!(cache.get(&"k"), Some(1));
        }
    }

    #[test]
    fn test_peek_tracks_latest_write() {
        let cache = CacheEngine::new(4, Duration::from_secs(60));
        assert_eq!(cache.peek(), None);

        cache.put("a", 1);
        cache.put("b", 2);
        cache.get(&"a");
        assert_eq!(cache.peek(), Some(("b", 2)));

        cache.remove(&"b");
        assert_eq!(cache.peek(), None);
    }

    #[test]
    fn test_values_and_entries() {
        let cache = CacheEngine::new(4, Duration::from_secs(60));
        cache.put(1, "x");
        cache.put(2, "y");

        let mut values = cache.values();
        values.sort_unstable();
        assert_eq!(values, vec!["x", "y"]);

        let mut entries = cache.entries();
        entries.sort_unstable();
        assert_eq!(entries, vec![(1, "x"), (2, "y")]);
    }

    #[test]
    fn test_purge_expired_manual() {
        let cache = CacheEngine::new(4, Duration::from_secs(60));
        cache.put(1, 1);
        assert_eq!(cache.purge_expired(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_shutdown_clears_and_ignores_puts() {
        let cache = CacheEngine::new(4, Duration::from_secs(60));
        cache.put(1, 1);
        cache.shutdown();

        assert!(cache.is_shut_down());
        assert!(cache.is_empty());
        cache.put(2, 2);
        assert_eq!(cache.get(&2), None);

        // Second shutdown is a no-op
        cache.shutdown();
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let cache = CacheEngine::new(0, Duration::from_secs(60));
        cache.put(1, 1);
        cache.put(2, 2);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.entries(), vec![(2, 2)]);
    }

    #[test]
    fn test_defaults() {
        let cache: CacheEngine<String, String> = CacheEngine::with_defaults();
        assert_eq!(cache.capacity(), 64);
        assert_eq!(cache.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_concurrent_access_respects_capacity() {
        let cache = Arc::new(CacheEngine::new(16, Duration::from_secs(60)));
        let workers: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..200 {
                        cache.put(t * 1000 + i, i);
                        cache.get(&(t * 1000 + i / 2));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(cache.len(), 16);
    }
}
