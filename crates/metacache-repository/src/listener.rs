//! Store change listeners
//!
//! Listeners are notified when a cached store record appears, changes, or
//! goes away. A failing or panicking listener is logged and skipped; it never
//! reaches the caller that mutated the cache, nor the listeners after it.

use derive_more::Display;
use metacache_common::Store;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// Result returned by listener callbacks
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Callbacks for store lifecycle events
///
/// The repository folds "created" into "changed": a store installed for
/// the first time is reported through [`Self::handle_store_changed`].
pub trait StoreDataChangedListener: Send + Sync {
    fn handle_store_created(&self, _store: &Store) -> ListenerResult {
        Ok(())
    }

    fn handle_store_changed(&self, _store: &Store) -> ListenerResult {
        Ok(())
    }

    fn handle_store_deleted(&self, _store: &Store) -> ListenerResult {
        Ok(())
    }
}

/// Kind of store event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum StoreEvent {
    #[display("creation")]
    Created,
    #[display("update")]
    Changed,
    #[display("deletion")]
    Deleted,
}

/// Set of registered listeners (no duplicates, no ordering)
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn StoreDataChangedListener>>>,
}

fn same_listener(a: &Arc<dyn StoreDataChangedListener>, b: &Arc<dyn StoreDataChangedListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

impl ListenerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; returns false if it was already registered
    pub fn register(&self, listener: Arc<dyn StoreDataChangedListener>) -> bool {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Unregister a listener; returns false if it wasn't registered
    pub fn unregister(&self, listener: &Arc<dyn StoreDataChangedListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Check if no listener is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every listener; returns how many listeners failed
    pub fn notify(&self, event: StoreEvent, store: &Store) -> usize {
        // Snapshot so callbacks may (un)register listeners without deadlocking.
        let listeners: Vec<_> = self.listeners.read().clone();
        let mut failures = 0;

        for listener in listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| match event {
                StoreEvent::Created => listener.handle_store_created(store),
                StoreEvent::Changed => listener.handle_store_changed(store),
                StoreEvent::Deleted => listener.handle_store_deleted(store),
            }));

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    error!("Could not handle store {} event for store {}: {}", event, store.name, e);
                }
                Err(_) => {
                    failures += 1;
                    error!("Listener panicked handling store {} event for store {}", event, store.name);
                }
            }
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        created: AtomicUsize,
        changed: AtomicUsize,
        deleted: AtomicUsize,
    }

    impl StoreDataChangedListener for Counting {
        fn handle_store_created(&self, _store: &Store) -> ListenerResult {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn handle_store_changed(&self, _store: &Store) -> ListenerResult {
            self.changed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn handle_store_deleted(&self, _store: &Store) -> ListenerResult {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl StoreDataChangedListener for Failing {
        fn handle_store_changed(&self, _store: &Store) -> ListenerResult {
            Err("listener is broken".into())
        }
    }

    struct Panicking;

    impl StoreDataChangedListener for Panicking {
        fn handle_store_changed(&self, _store: &Store) -> ListenerResult {
            panic!("listener blew up");
        }
    }

    #[test]
    fn test_register_is_a_set() {
        let registry = ListenerRegistry::new();
        let listener: Arc<dyn StoreDataChangedListener> = Arc::new(Counting::default());

        assert!(registry.register(Arc::clone(&listener)));
        assert!(!registry.register(Arc::clone(&listener)));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(&listener));
        assert!(!registry.unregister(&listener));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_notify_dispatches_by_event() {
        let registry = ListenerRegistry::new();
        let counting = Arc::new(Counting::default());
        registry.register(counting.clone());
        let store = Store::new("s");

        registry.notify(StoreEvent::Created, &store);
        registry.notify(StoreEvent::Changed, &store);
        registry.notify(StoreEvent::Changed, &store);
        registry.notify(StoreEvent::Deleted, &store);

        assert_eq!(counting.created.load(Ordering::SeqCst), 1);
        assert_eq!(counting.changed.load(Ordering::SeqCst), 2);
        assert_eq!(counting.deleted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_listeners_are_isolated() {
        let registry = ListenerRegistry::new();
        let counting = Arc::new(Counting::default());
        registry.register(Arc::new(Failing));
        registry.register(Arc::new(Panicking));
        registry.register(counting.clone());

        let failures = registry.notify(StoreEvent::Changed, &Store::new("s"));

        assert_eq!(failures, 2);
        assert_eq!(counting.changed.load(Ordering::SeqCst), 1);
    }
}
