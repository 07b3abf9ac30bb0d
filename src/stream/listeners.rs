//! Listener registration and dispatch.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::frame::StreamEvent;

/// Domain tag that receives every event.
pub const WILDCARD: &str = "*";

/// Event callback.
pub type Handler = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Handle returned by [`ListenerRegistry::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Domain-keyed listener table.
///
/// Registration may run concurrently with dispatch. Dispatch clones the
/// matching handler lists under the read lock and calls them after releasing
/// it, so a handler may itself register or remove listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<String, Vec<(ListenerId, Handler)>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `domain` (or [`WILDCARD`]).
    pub fn on<F>(&self, domain: impl Into<String>, handler: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(domain.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove every listener for `domain`.
    pub fn off(&self, domain: &str) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(domain);
    }

    /// Remove one listener. Returns whether it was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let mut found = false;
        listeners.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|(existing, _)| *existing != id);
            found |= handlers.len() != before;
            !handlers.is_empty()
        });
        found
    }

    /// Remove all listeners.
    pub fn off_all(&self) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Number of registered listeners across all domains.
    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Whether no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to domain listeners, then wildcard listeners.
    ///
    /// Returns how many handlers ran to completion. A panicking handler is
    /// logged and skipped.
    pub fn dispatch(&self, event: &StreamEvent) -> usize {
        let handlers: Vec<Handler> = {
            let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            let domain = listeners.get(&event.domain).into_iter().flatten();
            let wildcard = if event.domain == WILDCARD {
                None
            } else {
                listeners.get(WILDCARD)
            };
            domain
                .chain(wildcard.into_iter().flatten())
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        let mut completed = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => completed += 1,
                Err(_) => {
                    tracing::error!(
                        "Listener panicked on {} {} {}",
                        event.domain,
                        event.action,
                        event.resource_id
                    );
                },
            }
        }
        completed
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::frame::Action;
    use std::sync::Mutex;

    fn event(domain: &str) -> StreamEvent {
        StreamEvent {
            domain: domain.to_string(),
            action: Action::Update,
            resource_id: "123".to_string(),
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> Handler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |tag: &'static str| -> Handler {
            let sink = Arc::clone(&sink);
            Arc::new(move |e: &StreamEvent| sink.lock().unwrap().push(format!("{tag}:{}", e.resource_id)))
        };
        (log, make)
    }

    #[test]
    fn test_domain_before_wildcard() {
        let registry = ListenerRegistry::new();
        let (log, make) = recorder();

        // Wildcard registered first, still runs last
        let wildcard = make("all");
        registry.on(WILDCARD, move |e| wildcard(e));
        let order = make("order");
        registry.on("ORDER", move |e| order(e));
        let other = make("chat");
        registry.on("CHAT", move |e| other(e));

        assert_eq!(registry.dispatch(&event("ORDER")), 2);
        assert_eq!(*log.lock().unwrap(), vec!["order:123", "all:123"]);
    }

    #[test]
    fn test_panicking_handler_isolated() {
        let registry = ListenerRegistry::new();
        let (log, make) = recorder();

        registry.on("ORDER", |_| panic!("boom"));
        let after = make("after");
        registry.on("ORDER", move |e| after(e));

        assert_eq!(registry.dispatch(&event("ORDER")), 1);
        assert_eq!(*log.lock().unwrap(), vec!["after:123"]);
    }

    #[test]
    fn test_off_and_remove() {
        let registry = ListenerRegistry::new();
        let a = registry.on("ORDER", |_| {});
        registry.on("ORDER", |_| {});
        registry.on(WILDCARD, |_| {});
        assert_eq!(registry.len(), 3);

        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        assert_eq!(registry.len(), 2);

        registry.off("ORDER");
        assert_eq!(registry.dispatch(&event("ORDER")), 1);

        registry.off_all();
        assert!(registry.is_empty());
        assert_eq!(registry.dispatch(&event("ORDER")), 0);
    }

    #[test]
    fn test_handler_may_mutate_registry() {
        let registry = Arc::new(ListenerRegistry::new());
        let inner = Arc::clone(&registry);
        registry.on("ORDER", move |_| {
            inner.on("ORDER", |_| {});
        });

        assert_eq!(registry.dispatch(&event("ORDER")), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_registration_during_dispatch() {
        let registry = Arc::new(ListenerRegistry::new());
        registry.on(WILDCARD, |_| {});

        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let id = registry.on("ORDER", |_| {});
                    registry.remove(id);
                }
            })
        };
        for _ in 0..500 {
            assert!(registry.dispatch(&event("ORDER")) >= 1);
        }
        writer.join().unwrap();
        assert_eq!(registry.len(), 1);
    }
}
