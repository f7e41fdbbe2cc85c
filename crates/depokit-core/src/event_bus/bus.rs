//! Event Bus implementation.
//!
//! One bus is created per machine runtime and shared by `Arc` between the
//! axis clients, the coordinator, the executor and any telemetry consumer.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use super::events::{EventCategory, TelemetryEvent};

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.simple().to_string()[..8])
    }
}

/// Which events a handler receives
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    /// Every event
    #[default]
    All,
    /// Any of these categories
    Categories(Vec<EventCategory>),
}

impl EventFilter {
    /// Check if an event matches this filter
    pub fn matches(&self, event: &TelemetryEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Categories(categories) => categories.contains(&event.category()),
        }
    }
}

type EventHandler = Box<dyn Fn(TelemetryEvent) + Send + Sync>;

/// Configuration for the event bus
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Broadcast channel capacity
    pub channel_capacity: usize,
    /// Events kept in history; 0 keeps none
    pub history_size: usize,
    /// Age after which history entries are dropped
    pub history_retention: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            history_size: 0,
            history_retention: Duration::from_secs(300),
        }
    }
}

/// Bounded, age-limited record of published events
struct History {
    entries: VecDeque<(Instant, TelemetryEvent)>,
    size: usize,
    retention: Duration,
}

impl History {
    fn record(&mut self, event: &TelemetryEvent) {
        if self.size == 0 {
            return;
        }
        let now = Instant::now();
        while self.entries.len() >= self.size
            || self
                .entries
                .front()
                .is_some_and(|(at, _)| now.duration_since(*at) > self.retention)
        {
            self.entries.pop_front();
        }
        self.entries.push_back((now, event.clone()));
    }
}

/// Telemetry event bus
///
/// Synchronous handlers run on the publishing task, in no particular
/// order; async consumers take a broadcast [`receiver`](Self::receiver).
pub struct EventBus {
    sender: broadcast::Sender<TelemetryEvent>,
    handlers: RwLock<HashMap<SubscriptionId, (EventFilter, EventHandler)>>,
    history: Mutex<History>,
}

impl EventBus {
    /// Bus without history
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            handlers: RwLock::new(HashMap::new()),
            history: Mutex::new(History {
                entries: VecDeque::with_capacity(config.history_size.min(4096)),
                size: config.history_size,
                retention: config.history_retention,
            }),
        }
    }

    /// Publish an event; nobody listening is not an error
    pub fn emit(&self, event: TelemetryEvent) {
        self.history.lock().record(&event);

        for (filter, handler) in self.handlers.read().values() {
            if filter.matches(&event) {
                handler(event.clone());
            }
        }
        if self.sender.send(event).is_err() {
            tracing::trace!("no telemetry receivers");
        }
    }

    /// Register a synchronous handler
    ///
    /// The handler must return quickly; it runs inside `emit`.
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(TelemetryEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        self.handlers.write().insert(id, (filter, Box::new(handler)));
        tracing::debug!("Subscription {} added", id);
        id
    }

    /// Returns true if the subscription existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.handlers.write().remove(&id).is_some();
        if removed {
            tracing::debug!("Subscription {} removed", id);
        }
        removed
    }

    /// Broadcast receiver for async consumers
    pub fn receiver(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.sender.subscribe()
    }

    /// Number of synchronous handlers
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Retained events, oldest first
    pub fn history(&self) -> Vec<TelemetryEvent> {
        self.history
            .lock()
            .entries
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}
