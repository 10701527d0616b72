//! Named event subscriptions
//!
//! The registry outlives any single connection: listeners registered once
//! keep receiving events across reconnects until they unsubscribe.

use super::event::{EventKey, ServerEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Listener invoked with the session the event was received for
pub type Listener = Arc<dyn Fn(&str, &ServerEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fan-out of server events to local listeners, keyed by event name
#[derive(Default)]
pub struct EventRegistry {
    listeners: RwLock<HashMap<EventKey, Vec<(SubscriptionId, Listener)>>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event name
    pub fn subscribe<F>(&self, key: EventKey, listener: F) -> SubscriptionId
    where
        F: Fn(&str, &ServerEvent) + Send + Sync + 'static,
    {
        self.insert(key, Arc::new(listener))
    }

    /// Register one listener for every known event name
    pub fn subscribe_all<F>(&self, listener: F) -> Vec<SubscriptionId>
    where
        F: Fn(&str, &ServerEvent) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        EventKey::ALL
            .into_iter()
            .map(|key| self.insert(key, Arc::clone(&listener)))
            .collect()
    }

    fn insert(&self, key: EventKey, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        listeners.entry(key).or_default().push((id, listener));
        id
    }

    /// Remove a listener; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut removed = false;
        for entries in listeners.values_mut() {
            let before = entries.len();
            entries.retain(|(sid, _)| *sid != id);
            removed |= entries.len() != before;
        }
        removed
    }

    /// Deliver an event to every listener registered for its name.
    ///
    /// Listeners are invoked outside the lock so they may (un)subscribe.
    pub fn dispatch(&self, session_id: &str, event: &ServerEvent) -> usize {
        let targets: Vec<Listener> = {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            listeners
                .get(&event.key())
                .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
                .unwrap_or_default()
        };
        for listener in &targets {
            listener(session_id, event);
        }
        targets.len()
    }

    pub fn listener_count(&self, key: EventKey) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
            .map_or(0, Vec::len)
    }
}
