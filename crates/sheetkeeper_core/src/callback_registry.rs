//! Callback registry for history event subscriptions.
//!
//! This module provides a thread-safe registry for managing event callbacks.
//! Subscribers receive [`HistoryEvent`] notifications when the scheduler,
//! the undo coordinator or the conflict detector has something to report.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::events::{EventKind, HistoryEvent};

/// A unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback function type for history events.
///
/// Callbacks receive a reference to the event and should not block for extended periods.
pub type EventCallback = Arc<dyn Fn(&HistoryEvent) + Send + Sync>;

struct Subscription {
    /// `None` receives every event
    kind: Option<EventKind>,
    callback: EventCallback,
}

impl Subscription {
    fn wants(&self, event: &HistoryEvent) -> bool {
        self.kind.is_none_or(|kind| kind == event.kind())
    }
}

/// Thread-safe registry for managing event subscriptions.
///
/// # Example
///
/// ```ignore
/// use sheetkeeper_core::callback_registry::EventRegistry;
/// use sheetkeeper_core::events::EventKind;
/// use std::sync::Arc;
///
/// let registry = EventRegistry::new();
///
/// let id = registry.subscribe(Arc::new(|event| {
///     println!("Event: {}", event.name());
/// }));
///
/// // Only conflicts
/// registry.subscribe_to(EventKind::VersionConflict, Arc::new(|event| {
///     println!("Conflict: {:?}", event);
/// }));
///
/// registry.unsubscribe(id);
/// ```
pub struct EventRegistry {
    /// Map of subscription IDs to callbacks.
    callbacks: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating unique subscription IDs.
    next_id: AtomicU64,
}

impl EventRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to history events.
    ///
    /// Returns a subscription ID that can be used to unsubscribe later.
    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        self.insert(Subscription {
            kind: None,
            callback,
        })
    }

    /// Subscribe to one kind of event only.
    pub fn subscribe_to(&self, kind: EventKind, callback: EventCallback) -> SubscriptionId {
        self.insert(Subscription {
            kind: Some(kind),
            callback,
        })
    }

    fn insert(&self, subscription: Subscription) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut callbacks = self.callbacks.write().unwrap();
        callbacks.insert(id, subscription);
        id
    }

    /// Unsubscribe from history events.
    ///
    /// Returns `true` if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.write().unwrap();
        callbacks.remove(&id).is_some()
    }

    /// Emit an event to all registered callbacks.
    ///
    /// The callback list is snapshotted first, so a callback may subscribe
    /// or unsubscribe without deadlocking. A panicking callback does not
    /// affect the others.
    pub fn emit(&self, event: &HistoryEvent) {
        let callbacks: Vec<EventCallback> = {
            let callbacks = self.callbacks.read().unwrap();
            callbacks
                .values()
                .filter(|s| s.wants(event))
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };
        log::debug!(
            "Emitting {} to {} subscriber(s)",
            event.name(),
            callbacks.len()
        );
        for callback in callbacks {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(event);
            }));
            if result.is_err() {
                log::warn!("Subscriber panicked while handling {}", event.name());
            }
        }
    }

    /// Get the number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap().len()
    }

    /// Clear all subscriptions.
    pub fn clear(&self) {
        self.callbacks.write().unwrap().clear();
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let callbacks = self.callbacks.read().unwrap();
        f.debug_struct("EventRegistry")
            .field("subscriber_count", &callbacks.len())
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish()
    }
}
