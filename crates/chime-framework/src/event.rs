//! Typed publish/subscribe bus scoped to one robot.
//!
//! Every robot owns an [`EventBus`]. The brain, the middleware chains and the
//! listeners publish [`RobotEvent`]s on it; error handlers, persistence
//! backends and loggers subscribe.
//!
//! Subscribers are synchronous. A subscriber that needs to do async work
//! (writing a snapshot to disk, for instance) spawns a task from inside the
//! callback. Subscribers run in registration order and each one is isolated:
//! a panicking subscriber is logged and the remaining ones still run.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::error;

use crate::error::ChainFault;
use crate::response::Response;

/// An event published on a robot's bus.
#[derive(Debug, Clone)]
pub enum RobotEvent {
    /// The robot started running.
    Running,
    /// A stage, listener or callback faulted.
    Error {
        /// What went wrong.
        fault: ChainFault,
        /// The response that was in flight, when there was one.
        response: Option<Response>,
    },
    /// Brain data changed in memory.
    Changed,
    /// A snapshot was merged into the brain.
    Loaded(Value),
    /// The brain asks to persist this snapshot.
    Persist(Value),
    /// The brain was closed.
    Closed,
}

impl RobotEvent {
    /// Returns the event's name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Error { .. } => "error",
            Self::Changed => "changed",
            Self::Loaded(_) => "loaded",
            Self::Persist(_) => "persist",
            Self::Closed => "closed",
        }
    }
}

/// A bus subscriber.
pub type Subscriber = Arc<dyn Fn(&RobotEvent) + Send + Sync>;

/// A per-robot event bus.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber.
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&RobotEvent) + Send + Sync + 'static,
    {
        self.subscribers.write().push(Arc::new(subscriber));
    }

    /// Returns the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Delivers `event` to every subscriber.
    pub fn emit(&self, event: &RobotEvent) {
        let subscribers = self.subscribers.read().clone();
        for subscriber in subscribers {
            if catch_unwind(AssertUnwindSafe(|| subscriber(event))).is_err() {
                error!(event = event.name(), "Event subscriber panicked");
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_subscribers_run_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = seen.clone();
            bus.subscribe(move |event| seen.lock().push(format!("{tag}:{}", event.name())));
        }

        bus.emit(&RobotEvent::Running);
        bus.emit(&RobotEvent::Closed);

        assert_eq!(
            *seen.lock(),
            vec![
                "first:running",
                "second:running",
                "first:closed",
                "second:closed"
            ]
        );
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));

        bus.subscribe(|_| panic!("subscriber bug"));
        let c = count.clone();
        bus.subscribe(move |_| *c.lock() += 1);

        bus.emit(&RobotEvent::Changed);
        assert_eq!(*count.lock(), 1);
    }
}
