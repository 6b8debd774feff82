//! Lifecycle events and the sinks that receive them.
//!
//! The manager publishes synchronously, from inside `step()`, and never
//! while holding its own state borrow, so handlers may call back into the
//! manager.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use cadence_core::topics;

use crate::task::{TaskHandle, TaskId};

/// Something that happened to a task or the clock.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// First transition from pending staging into the active list.
    Spawn(TaskHandle),
    /// Final removal, after upon-death ran.
    Remove(TaskHandle),
    /// `run()` corrected a clock slip of `delta` seconds.
    ClockReset { delta: f64 },
    /// Verbose: a task was queued with a delay.
    SpawnLater(TaskHandle),
    /// Verbose: a task returned AGAIN and was re-queued.
    Again(TaskHandle),
}

impl TaskEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            TaskEvent::Spawn(_) => topics::TASK_SPAWN,
            TaskEvent::Remove(_) => topics::TASK_REMOVE,
            TaskEvent::ClockReset { .. } => topics::CLOCK_RESET,
            TaskEvent::SpawnLater(_) => topics::TASK_SPAWN_LATER,
            TaskEvent::Again(_) => topics::TASK_AGAIN,
        }
    }

    pub fn task(&self) -> Option<&TaskHandle> {
        match self {
            TaskEvent::Spawn(task)
            | TaskEvent::Remove(task)
            | TaskEvent::SpawnLater(task)
            | TaskEvent::Again(task) => Some(task),
            TaskEvent::ClockReset { .. } => None,
        }
    }

    /// Serializable form for forwarding to an external bus.
    pub fn envelope(&self) -> EventEnvelope {
        let payload = match self {
            TaskEvent::ClockReset { delta } => EventPayload::Clock { delta: *delta },
            TaskEvent::Spawn(task)
            | TaskEvent::Remove(task)
            | TaskEvent::SpawnLater(task)
            | TaskEvent::Again(task) => EventPayload::Task {
                task_id: task.id(),
                name: task.name().to_string(),
                sort: task.sort(),
                wake_time: task.wake_time(),
            },
        };
        EventEnvelope {
            topic: self.topic().to_string(),
            payload,
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4(),
            version: 1,
        }
    }
}

/// Wire form of a [`TaskEvent`].
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub topic: String,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub version: u16,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Task {
        task_id: TaskId,
        name: String,
        sort: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        wake_time: Option<f64>,
    },
    Clock {
        delta: f64,
    },
}

/// Receives lifecycle events.
pub trait EventSink {
    fn publish(&self, event: &TaskEvent);
}

impl<T: EventSink + ?Sized> EventSink for Rc<T> {
    fn publish(&self, event: &TaskEvent) {
        (**self).publish(event)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &TaskEvent) {}
}

/// Writes every event to the debug log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &TaskEvent) {
        match event {
            TaskEvent::ClockReset { delta } => debug!(topic = event.topic(), delta, "event"),
            other => {
                if let Some(task) = other.task() {
                    debug!(topic = event.topic(), task_id = task.id(), task = task.name(), "event");
                }
            }
        }
    }
}

/// Keeps every event, for assertions.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: RefCell<Vec<TaskEvent>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.borrow().clone()
    }

    pub fn topics(&self) -> Vec<&'static str> {
        self.events.borrow().iter().map(TaskEvent::topic).collect()
    }

    /// Names of the tasks carried by events on `topic`, in order.
    pub fn task_names(&self, topic: &str) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.topic() == topic)
            .filter_map(|e| e.task().map(|t| t.name().to_string()))
            .collect()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.events.borrow().iter().filter(|e| e.topic() == topic).count()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl EventSink for EventRecorder {
    fn publish(&self, event: &TaskEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Rc<RefCell<dyn FnMut(&TaskEvent)>>;

struct Subscription {
    id: SubscriptionId,
    topic: String,
    handler: Handler,
}

/// Topic-routed, in-process event bus.
///
/// Subscribing to `"*"` receives every topic. A handler that triggers an
/// event it is itself subscribed to does not see the nested delivery.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RefCell<Vec<Subscription>>,
    next_id: std::cell::Cell<u64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: FnMut(&TaskEvent) + 'static,
    {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscriptions.borrow_mut().push(Subscription {
            id,
            topic: topic.into(),
            handler: Rc::new(RefCell::new(handler)),
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.borrow_mut();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscriptions
            .borrow()
            .iter()
            .filter(|s| s.topic == topic || s.topic == "*")
            .count()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: &TaskEvent) {
        let topic = event.topic();
        let handlers: Vec<Handler> = self
            .subscriptions
            .borrow()
            .iter()
            .filter(|s| s.topic == topic || s.topic == "*")
            .map(|s| Rc::clone(&s.handler))
            .collect();

        for handler in handlers {
            match handler.try_borrow_mut() {
                Ok(mut f) => (*f)(event),
                Err(_) => warn!(topic, "skipping nested delivery to a busy handler"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskSpec, TaskStatus};

    fn task(name: &str) -> TaskHandle {
        TaskSpec::new(name, |_| TaskStatus::Cont).detached()
    }

    #[test]
    fn topics_match_constants() {
        let t = task("t");
        assert_eq!(TaskEvent::Spawn(t.clone()).topic(), "task-spawn");
        assert_eq!(TaskEvent::Remove(t.clone()).topic(), "task-remove");
        assert_eq!(TaskEvent::SpawnLater(t.clone()).topic(), "task-spawn-later");
        assert_eq!(TaskEvent::Again(t).topic(), "task-again");
        assert_eq!(TaskEvent::ClockReset { delta: 0.1 }.topic(), "clock-reset");
    }

    #[test]
    fn envelope_serializes_task_fields() {
        let t = task("walker");
        let json = serde_json::to_value(TaskEvent::Spawn(t.clone()).envelope()).unwrap();
        assert_eq!(json["topic"], "task-spawn");
        assert_eq!(json["payload"]["name"], "walker");
        assert_eq!(json["payload"]["task_id"], t.id());
        assert!(json["payload"].get("wake_time").is_none());
        assert_eq!(json["version"], 1);

        let json = serde_json::to_value(TaskEvent::ClockReset { delta: -0.5 }.envelope()).unwrap();
        assert_eq!(json["payload"]["delta"], -0.5);
    }

    #[test]
    fn recorder_counts_by_topic() {
        let rec = EventRecorder::new();
        rec.publish(&TaskEvent::Spawn(task("a")));
        rec.publish(&TaskEvent::Spawn(task("b")));
        rec.publish(&TaskEvent::Remove(task("a")));
        assert_eq!(rec.count(topics::TASK_SPAWN), 2);
        assert_eq!(rec.task_names(topics::TASK_SPAWN), vec!["a", "b"]);
        assert_eq!(rec.topics(), vec!["task-spawn", "task-spawn", "task-remove"]);
        rec.clear();
        assert!(rec.events().is_empty());
    }

    #[test]
    fn bus_routes_by_topic_and_wildcard() {
        let bus = EventBus::new();
        let spawns = Rc::new(RefCell::new(0));
        let all = Rc::new(RefCell::new(0));
        let s = Rc::clone(&spawns);
        let a = Rc::clone(&all);
        let id = bus.subscribe(topics::TASK_SPAWN, move |_| *s.borrow_mut() += 1);
        bus.subscribe("*", move |_| *a.borrow_mut() += 1);

        bus.publish(&TaskEvent::Spawn(task("x")));
        bus.publish(&TaskEvent::Remove(task("x")));
        assert_eq!(*spawns.borrow(), 1);
        assert_eq!(*all.borrow(), 2);
        assert_eq!(bus.subscriber_count(topics::TASK_SPAWN), 2);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&TaskEvent::Spawn(task("y")));
        assert_eq!(*spawns.borrow(), 1);
    }

    #[test]
    fn bus_skips_nested_delivery_to_same_handler() {
        let bus = Rc::new(EventBus::new());
        let hits = Rc::new(RefCell::new(0));
        let inner_bus = Rc::clone(&bus);
        let h = Rc::clone(&hits);
        bus.subscribe("*", move |event| {
            *h.borrow_mut() += 1;
            if matches!(event, TaskEvent::Spawn(_)) {
                inner_bus.publish(&TaskEvent::Remove(task("nested")));
            }
        });
        bus.publish(&TaskEvent::Spawn(task("outer")));
        assert_eq!(*hits.borrow(), 1);
    }
}
