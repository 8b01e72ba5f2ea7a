//! Change listeners.
//!
//! Subscribing returns a [`Subscription`] handle; dropping it (or calling
//! [`Subscription::unsubscribe`]) removes the listener.

use crate::ChangeEvent;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// A change listener.
pub type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    listeners: DashMap<u64, Listener>,
    next_id: AtomicU64,
}

/// The listeners of one datastore.
#[derive(Clone, Default)]
pub struct Observers {
    registry: Arc<Registry>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.listeners.insert(id, Arc::new(listener));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Call every listener, in subscription order.
    ///
    /// Listeners are collected before any is called, so a listener may drop
    /// its own or another subscription.
    pub fn publish(&self, event: &ChangeEvent) {
        let mut listeners: Vec<(u64, Listener)> = self
            .registry
            .listeners
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        listeners.sort_by_key(|(id, _)| *id);

        for (_, listener) in listeners {
            listener(event);
        }
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.registry.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.registry.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.listeners.is_empty()
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Keeps a listener registered until dropped.
#[must_use = "the listener is removed when the subscription is dropped"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Remove the listener now.
    pub fn unsubscribe(self) {}

    /// Whether the listener is still registered.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.listeners.contains_key(&self.id))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.listeners.remove(&self.id);
        }
    }
}
