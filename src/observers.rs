//! Ordered observer lists for multicast notifications
//!
//! Observers are registered under a string id. Delivery follows
//! registration order, and registering the same id twice is refused so an
//! observer can never be notified twice for one event.

use parking_lot::RwLock;
use std::sync::Arc;

/// Callback invoked for every notification
pub type ObserverFn<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Named observers delivered in registration order
pub struct ObserverList<T> {
    observers: RwLock<Vec<(String, ObserverFn<T>)>>,
}

impl<T> ObserverList<T> {
    /// Create an empty observer list
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register an observer; returns `false` if `id` is already registered
    pub fn add<F>(&self, id: impl Into<String>, observer: F) -> bool
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = id.into();
        let mut observers = self.observers.write();
        if observers.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        observers.push((id, Arc::new(observer)));
        true
    }

    /// Remove an observer; returns `false` if it was not registered
    pub fn remove(&self, id: &str) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| existing != id);
        observers.len() != before
    }

    /// Deliver `event` to every observer
    ///
    /// The list is snapshotted first, so observers may add or remove
    /// observers (including themselves) while being notified.
    pub fn notify(&self, event: &T) {
        let snapshot: Vec<ObserverFn<T>> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in snapshot {
            observer(event);
        }
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Whether no observer is registered
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Drop every observer
    pub fn clear(&self) {
        self.observers.write().clear();
    }
}

impl<T> Default for ObserverList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ObserverList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.observers.read().iter().map(|(id, _)| id.clone()).collect();
        f.debug_struct("ObserverList").field("observers", &ids).finish()
    }
}
