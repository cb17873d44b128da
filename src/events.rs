//! Typed event emitter with wildcard subscription and bounded history.
//!
//! Deliberately built on handler registries rather than a broadcast
//! channel: specific-then-wildcard invocation order, handler-exception
//! isolation, and synchronous (non-blocking) delivery are all required,
//! none of which a `tokio::sync::broadcast` channel gives for free.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Dotted event-name constants for the fixed externally-observed namespace
/// (`spec.md` §6). Strategies and callers may also emit names outside this
/// set; the emitter does not enforce a closed vocabulary.
pub mod names {
    pub const SWARM_START: &str = "swarm:start";
    pub const SWARM_COMPLETE: &str = "swarm:complete";
    pub const SWARM_ERROR: &str = "swarm:error";
    pub const SWARM_PAUSED: &str = "swarm:paused";
    pub const SWARM_RESUMED: &str = "swarm:resumed";
    pub const SWARM_ABORTED: &str = "swarm:aborted";
    pub const SWARM_RESET: &str = "swarm:reset";

    pub const AGENT_START: &str = "agent:start";
    pub const AGENT_COMPLETE: &str = "agent:complete";
    pub const AGENT_ERROR: &str = "agent:error";

    pub const AUCTION_START: &str = "auction:start";
    pub const AUCTION_BID: &str = "auction:bid";
    pub const AUCTION_WINNER: &str = "auction:winner";
    pub const AUCTION_COMPLETE: &str = "auction:complete";

    pub const CONSENSUS_ROUND: &str = "consensus:round";
    pub const CONSENSUS_TURN: &str = "consensus:turn";
    pub const CONSENSUS_VOTE: &str = "consensus:vote";
    pub const CONSENSUS_REACHED: &str = "consensus:reached";

    pub const DEBATE_ROUND: &str = "debate:round";
    pub const DEBATE_TURN: &str = "debate:turn";

    pub const PIPELINE_STAGE: &str = "pipeline:stage";
    pub const PIPELINE_STAGE_COMPLETE: &str = "pipeline:stage:complete";
    pub const PIPELINE_GATE_PASS: &str = "pipeline:gate:pass";
    pub const PIPELINE_GATE_FAIL: &str = "pipeline:gate:fail";

    pub const ROUND_ROBIN_ASSIGNED: &str = "round-robin:assigned";
}

/// Wildcard subscription token, matched literally by `on`/`once`.
pub const WILDCARD: &str = "*";

/// One recorded event, as kept in the bounded ring history.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub agent_name: Option<String>,
    pub data: Value,
}

/// A registered handler. Handlers are plain synchronous closures; a handler
/// that needs to do async work spawns its own task — the emitter never
/// awaits a handler.
pub type Handler = Arc<dyn Fn(&EventRecord) + Send + Sync>;

struct Registered {
    id: u64,
    once: bool,
    handler: Handler,
}

struct Inner {
    by_type: HashMap<String, Vec<Registered>>,
    wildcard: Vec<Registered>,
    history: VecDeque<EventRecord>,
    history_capacity: usize,
    next_id: u64,
}

/// Handle returned by `on`/`once`. Dropping it does nothing; call
/// `unsubscribe` explicitly to remove the handler.
#[must_use = "dropping a Subscription does not unsubscribe the handler"]
pub struct Subscription {
    inner: Arc<Mutex<Inner>>,
    id: u64,
    event_type: Option<String>,
}

impl Subscription {
    /// Remove this handler. Safe to call more than once.
    pub fn unsubscribe(self) {
        let mut inner = self.inner.lock().expect("event emitter lock poisoned");
        match &self.event_type {
            Some(ty) => {
                if let Some(list) = inner.by_type.get_mut(ty) {
                    list.retain(|r| r.id != self.id);
                }
            }
            None => inner.wildcard.retain(|r| r.id != self.id),
        }
    }
}

/// Typed fan-out of named events with wildcard subscription and bounded
/// ring-buffered history (default capacity 1,000).
pub struct EventEmitter {
    inner: Arc<Mutex<Inner>>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::with_history_capacity(1000)
    }

    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                by_type: HashMap::new(),
                wildcard: Vec::new(),
                history: VecDeque::with_capacity(capacity.min(4096)),
                history_capacity: capacity,
                next_id: 0,
            })),
        }
    }

    fn register(&self, event_type: &str, once: bool, handler: Handler) -> Subscription {
        let mut inner = self.inner.lock().expect("event emitter lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        let registered = Registered { id, once, handler };
        let event_type_owned = if event_type == WILDCARD {
            inner.wildcard.push(registered);
            None
        } else {
            inner.by_type.entry(event_type.to_string()).or_default().push(registered);
            Some(event_type.to_string())
        };
        Subscription { inner: Arc::clone(&self.inner), id, event_type: event_type_owned }
    }

    /// Subscribe to `event_type` (or `"*"` for all events). Handlers for a
    /// specific type run before wildcard handlers, both in registration
    /// order.
    pub fn on<F>(&self, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&EventRecord) + Send + Sync + 'static,
    {
        self.register(event_type, false, Arc::new(handler))
    }

    /// Subscribe for exactly one invocation, then auto-unsubscribe.
    pub fn once<F>(&self, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&EventRecord) + Send + Sync + 'static,
    {
        self.register(event_type, true, Arc::new(handler))
    }

    /// Remove a specific subscription (equivalent to calling
    /// `Subscription::unsubscribe`).
    pub fn off(&self, subscription: Subscription) {
        subscription.unsubscribe();
    }

    /// Remove every handler for `event_type`, or every handler at all if
    /// `event_type` is `None`.
    pub fn remove_all_listeners(&self, event_type: Option<&str>) {
        let mut inner = self.inner.lock().expect("event emitter lock poisoned");
        match event_type {
            Some(ty) => {
                inner.by_type.remove(ty);
            }
            None => {
                inner.by_type.clear();
                inner.wildcard.clear();
            }
        }
    }

    /// Emit `event_type` with `data`, recording it in history and invoking
    /// matching handlers (specific-type first, then wildcard, both in
    /// registration order). Handler panics are caught and logged; they
    /// never propagate to the caller.
    pub fn emit(&self, event_type: &str, data: Value, agent_name: Option<String>) {
        let record = EventRecord {
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            agent_name,
            data,
        };

        let (specific, wildcard) = {
            let mut inner = self.inner.lock().expect("event emitter lock poisoned");

            if inner.history_capacity > 0 {
                if inner.history.len() >= inner.history_capacity {
                    inner.history.pop_front();
                }
                inner.history.push_back(record.clone());
            }

            let specific: Vec<Handler> = inner
                .by_type
                .get(event_type)
                .map(|list| list.iter().map(|r| Arc::clone(&r.handler)).collect())
                .unwrap_or_default();
            let wildcard: Vec<Handler> = inner.wildcard.iter().map(|r| Arc::clone(&r.handler)).collect();

            if let Some(list) = inner.by_type.get_mut(event_type) {
                list.retain(|r| !r.once);
            }
            inner.wildcard.retain(|r| !r.once);

            (specific, wildcard)
        };

        for handler in specific.iter().chain(wildcard.iter()) {
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&record))) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<non-string panic payload>".to_string());
                tracing::warn!(event = event_type, %message, "event handler panicked");
            }
        }
    }

    pub fn get_events(&self) -> Vec<EventRecord> {
        self.inner.lock().expect("event emitter lock poisoned").history.iter().cloned().collect()
    }

    pub fn get_events_by_type(&self, event_type: &str) -> Vec<EventRecord> {
        self.inner
            .lock()
            .expect("event emitter lock poisoned")
            .history
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn get_events_by_agent(&self, agent_name: &str) -> Vec<EventRecord> {
        self.inner
            .lock()
            .expect("event emitter lock poisoned")
            .history
            .iter()
            .filter(|e| e.agent_name.as_deref() == Some(agent_name))
            .cloned()
            .collect()
    }

    pub fn clear_events(&self) {
        self.inner.lock().expect("event emitter lock poisoned").history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn specific_then_wildcard_in_registration_order() {
        let emitter = EventEmitter::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        emitter.on("foo", move |_| o1.lock().unwrap().push("specific-1"));
        let o2 = Arc::clone(&order);
        emitter.on(WILDCARD, move |_| o2.lock().unwrap().push("wild-1"));
        let o3 = Arc::clone(&order);
        emitter.on("foo", move |_| o3.lock().unwrap().push("specific-2"));
        let o4 = Arc::clone(&order);
        emitter.on(WILDCARD, move |_| o4.lock().unwrap().push("wild-2"));

        emitter.emit("foo", Value::Null, None);

        assert_eq!(*order.lock().unwrap(), vec!["specific-1", "specific-2", "wild-1", "wild-2"]);
    }

    #[test]
    fn handler_panic_is_isolated() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));

        emitter.on("foo", |_| panic!("boom"));
        let c = Arc::clone(&count);
        emitter.on("foo", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit("foo", Value::Null, None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn once_fires_a_single_time() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        emitter.once("foo", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit("foo", Value::Null, None);
        emitter.emit("foo", Value::Null, None);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = emitter.on("foo", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        sub.unsubscribe();
        emitter.emit("foo", Value::Null, None);

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn history_is_bounded() {
        let emitter = EventEmitter::with_history_capacity(3);
        for i in 0..5 {
            emitter.emit("foo", serde_json::json!(i), None);
        }
        let history = emitter.get_events();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].data, serde_json::json!(2));
        assert_eq!(history[2].data, serde_json::json!(4));
    }

    #[test]
    fn get_events_by_type_and_agent() {
        let emitter = EventEmitter::new();
        emitter.emit("a", Value::Null, Some("agent-1".to_string()));
        emitter.emit("b", Value::Null, Some("agent-2".to_string()));
        emitter.emit("a", Value::Null, Some("agent-2".to_string()));

        assert_eq!(emitter.get_events_by_type("a").len(), 2);
        assert_eq!(emitter.get_events_by_agent("agent-2").len(), 2);
    }
}
