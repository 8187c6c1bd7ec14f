use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

/// Lifecycle events observable through the callback registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackEvent {
    QueryStart,
    ComplexityDetected,
    ModelCallStart,
    ModelCallComplete,
    ModelCallError,
    CascadeDecision,
    QueryComplete,
    QueryError,
}

/// Data passed to callbacks.
#[derive(Debug, Clone)]
pub struct CallbackData {
    pub event: CallbackEvent,
    pub query: String,
    pub user_tier: Option<String>,
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

type Callback = Arc<dyn Fn(&CallbackData) + Send + Sync>;

#[derive(Default)]
struct Registry {
    callbacks: HashMap<CallbackEvent, Vec<Callback>>,
    total_triggers: u64,
    by_event: HashMap<CallbackEvent, u64>,
}

/// Registry of monitoring hooks. Triggering never propagates callback
/// failures into the request path.
#[derive(Default)]
pub struct CallbackManager {
    registry: RwLock<Registry>,
}

impl CallbackManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event: CallbackEvent, callback: Callback) {
        let mut registry = self.registry.write();
        registry.callbacks.entry(event).or_default().push(callback);
        debug!(?event, "registered callback");
    }

    pub fn trigger(
        &self,
        event: CallbackEvent,
        query: &str,
        data: Map<String, Value>,
        user_tier: Option<String>,
    ) {
        let callbacks = {
            let mut registry = self.registry.write();
            registry.total_triggers += 1;
            *registry.by_event.entry(event).or_insert(0) += 1;
            registry.callbacks.get(&event).cloned().unwrap_or_default()
        };

        if callbacks.is_empty() {
            return;
        }

        let payload = CallbackData {
            event,
            query: query.to_string(),
            user_tier,
            data,
            timestamp: Utc::now(),
        };
        for callback in callbacks {
            callback(&payload);
        }
    }

    pub fn clear(&self, event: Option<CallbackEvent>) {
        let mut registry = self.registry.write();
        match event {
            Some(event) => {
                registry.callbacks.remove(&event);
            }
            None => registry.callbacks.clear(),
        }
    }

    pub fn total_triggers(&self) -> u64 {
        self.registry.read().total_triggers
    }

    pub fn triggers_for(&self, event: CallbackEvent) -> u64 {
        self.registry.read().by_event.get(&event).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn callbacks_fire_for_their_event() {
        let manager = CallbackManager::new();
        let hits = Arc::new(AtomicU64::new(0));
        let hits_clone = Arc::clone(&hits);
        manager.register(
            CallbackEvent::CascadeDecision,
            Arc::new(move |_| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        manager.trigger(CallbackEvent::CascadeDecision, "q", Map::new(), None);
        manager.trigger(CallbackEvent::QueryComplete, "q", Map::new(), None);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn triggers_counted_even_without_callbacks() {
        let manager = CallbackManager::new();
        manager.trigger(CallbackEvent::QueryStart, "q", Map::new(), None);
        manager.trigger(CallbackEvent::QueryStart, "q", Map::new(), None);
        assert_eq!(manager.total_triggers(), 2);
        assert_eq!(manager.triggers_for(CallbackEvent::QueryStart), 2);
        assert_eq!(manager.triggers_for(CallbackEvent::QueryError), 0);
    }

    #[test]
    fn clear_removes_registrations() {
        let manager = CallbackManager::new();
        let hits = Arc::new(AtomicU64::new(0));
        let hits_clone = Arc::clone(&hits);
        manager.register(
            CallbackEvent::QueryComplete,
            Arc::new(move |_| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        manager.clear(Some(CallbackEvent::QueryComplete));
        manager.trigger(CallbackEvent::QueryComplete, "q", Map::new(), None);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
