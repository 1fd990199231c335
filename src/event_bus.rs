//! Event Bus (C1), §4.1 — in-process pub/sub with a bounded event log.
//!
//! Delivery is fire-and-forget, best-effort, unordered across events, FIFO per (event,
//! subscriber). Handlers must not block the publisher: each handler is invoked in its own
//! spawned task so a slow or panicking subscriber can never stall `publish`. The bus retains
//! the last 100 events for diagnostics and has no persistence of its own — crash-safety lives
//! in Store.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{trace, warn};

use crate::model::Event;

const EVENT_LOG_CAPACITY: usize = 100;

/// A subscriber callback. Boxed so the bus can hold a heterogeneous list per event name.
pub type Handler = Arc<dyn Fn(Event) + Send + Sync>;

#[derive(Default)]
struct Registry {
    /// Handlers keyed by event name, FIFO per (event, subscriber) via `Vec` push order.
    by_event: HashMap<String, Vec<Handler>>,
    /// Handlers subscribed to every event regardless of name.
    wildcard: Vec<Handler>,
    /// Agents that have called `register`, purely for `status()` reporting.
    registered_agents: Vec<String>,
}

/// The shared, `Arc`-wrapped event bus. Construct once at startup and clone the `Arc` into
/// every component that needs to publish or subscribe.
pub struct EventBus {
    registry: RwLock<Registry>,
    log: RwLock<VecDeque<Event>>,
}

/// Snapshot returned by `status()`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BusStatus {
    pub registered_agents: Vec<String>,
    pub event_names_with_subscribers: Vec<String>,
    pub wildcard_subscriber_count: usize,
    pub log_len: usize,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: RwLock::new(Registry::default()),
            log: RwLock::new(VecDeque::with_capacity(EVENT_LOG_CAPACITY)),
        })
    }

    /// Record that `agent` is a participant in the bus. Idempotent.
    pub fn register(&self, agent: impl Into<String>) {
        let agent = agent.into();
        let mut reg = self.registry.write();
        if !reg.registered_agents.contains(&agent) {
            reg.registered_agents.push(agent);
        }
    }

    /// Subscribe `handler` to `event_name`. Returns nothing the caller needs to hold — there is
    /// no unsubscribe in the source protocol.
    pub fn subscribe(&self, event_name: impl Into<String>, handler: Handler) {
        self.registry
            .write()
            .by_event
            .entry(event_name.into())
            .or_default()
            .push(handler);
    }

    /// Subscribe to every event published on the bus.
    pub fn subscribe_all(&self, handler: Handler) {
        self.registry.write().wildcard.push(handler);
    }

    /// Publish `event_name` with `payload` from `from_agent`. Best-effort: each matching
    /// handler runs in its own spawned task so a slow/panicking handler cannot block the
    /// publisher or other handlers.
    pub fn publish(&self, from_agent: impl Into<String>, event_name: impl Into<String>, payload: serde_json::Value) {
        let event = Event {
            from_agent: from_agent.into(),
            name: event_name.into(),
            payload,
            timestamp: Utc::now(),
        };

        {
            let mut log = self.log.write();
            if log.len() == EVENT_LOG_CAPACITY {
                log.pop_front();
            }
            log.push_back(event.clone());
        }

        let reg = self.registry.read();
        let mut dispatched = 0usize;
        if let Some(handlers) = reg.by_event.get(&event.name) {
            for h in handlers {
                dispatched += 1;
                spawn_handler(h.clone(), event.clone());
            }
        }
        for h in &reg.wildcard {
            dispatched += 1;
            spawn_handler(h.clone(), event.clone());
        }
        trace!(event = %event.name, from = %event.from_agent, dispatched, "event published");
    }

    /// Last `n` events (most recent last), for diagnostics.
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let log = self.log.read();
        log.iter().rev().take(n).rev().cloned().collect()
    }

    pub fn status(&self) -> BusStatus {
        let reg = self.registry.read();
        BusStatus {
            registered_agents: reg.registered_agents.clone(),
            event_names_with_subscribers: reg.by_event.keys().cloned().collect(),
            wildcard_subscriber_count: reg.wildcard.len(),
            log_len: self.log.read().len(),
        }
    }
}

fn spawn_handler(handler: Handler, event: Event) {
    // Each handler runs on its own task. A panicking handler only takes down that task, not
    // the publisher or any other subscriber.
    tokio::spawn(async move {
        handler(event);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn publish_dispatches_to_matching_and_wildcard() {
        let bus = EventBus::new();
        let matched = Arc::new(AtomicUsize::new(0));
        let wild = Arc::new(AtomicUsize::new(0));

        let m = matched.clone();
        bus.subscribe(
            "signal.active",
            Arc::new(move |_e| {
                m.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let w = wild.clone();
        bus.subscribe_all(Arc::new(move |_e| {
            w.fetch_add(1, Ordering::SeqCst);
        }));

        bus.publish("strategy_agent", "signal.active", serde_json::json!({"id": "SIG-1"}));
        bus.publish("strategy_agent", "other.event", serde_json::json!({}));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(matched.load(Ordering::SeqCst), 1);
        assert_eq!(wild.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn log_is_bounded_to_100() {
        let bus = EventBus::new();
        for i in 0..150 {
            bus.publish("x", "tick", serde_json::json!({"i": i}));
        }
        assert_eq!(bus.status().log_len, 100);
        let recent = bus.recent_events(5);
        assert_eq!(recent.len(), 5);
    }

    #[test]
    fn register_is_idempotent() {
        let bus = EventBus::new();
        bus.register("strategy_agent");
        bus.register("strategy_agent");
        assert_eq!(bus.status().registered_agents.len(), 1);
    }
}
