//! Structured event envelope for observability and tests.
//!
//! Every lifecycle event the engine emits is a single JSON object:
//! `{kind: "peershare.event", version: 1, event: <name>, timestamp: <ms>,
//! payload: {...}}`. This is deliberately separate from `tracing`'s
//! human-oriented log lines — the envelope is the machine-readable surface
//! that integration tests and any post-mortem tooling key off of.

use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

use crate::time::Clock;

/// Envelope format version. Bumped only on a breaking payload-shape
/// change.
pub const ENVELOPE_VERSION: u32 = 1;

/// A single structured lifecycle event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    kind: &'static str,
    version: u32,
    event: String,
    timestamp: i64,
    payload: Value,
}

impl Event {
    fn new(name: impl Into<String>, timestamp: i64, payload: Value) -> Self {
        Self {
            kind: "peershare.event",
            version: ENVELOPE_VERSION,
            event: name.into(),
            timestamp,
            payload,
        }
    }

    /// Serializes this event as a single-line JSON string.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// The event's name, e.g. `"transfer_send_complete"`.
    pub fn name(&self) -> &str {
        &self.event
    }

    /// The event's payload object.
    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

/// Destination for structured events.
///
/// Production code routes events through [`TracingSink`], which also logs
/// a `tracing::info!` line; tests use [`MemorySink`] to assert on exact
/// events without parsing log output.
pub trait EventSink: Send + Sync {
    /// Records one event.
    fn record(&self, event: Event);
}

/// Emits every event as a `tracing` info-level structured log line, using
/// the same single-line JSON envelope so the two surfaces never drift.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: Event) {
        tracing::info!(target: "peershare::event", "{}", event.to_json_line());
    }
}

/// Retains every recorded event in order, for test assertions.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every event recorded so far, in order.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Returns the names of every recorded event, in order.
    pub fn event_names(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|e| e.event.clone())
            .collect()
    }

    /// Returns every event whose name matches `name`.
    pub fn events_named(&self, name: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.event == name)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// Emits structured events against a clock and sink pair.
///
/// Cheap to clone: holds only shared references to its collaborators.
pub struct EventEmitter<'a> {
    clock: &'a dyn Clock,
    sink: &'a dyn EventSink,
}

impl<'a> EventEmitter<'a> {
    /// Creates an emitter bound to a clock (for the envelope's
    /// `timestamp`) and a sink (for delivery).
    pub fn new(clock: &'a dyn Clock, sink: &'a dyn EventSink) -> Self {
        Self { clock, sink }
    }

    /// Emits an event with the given name and JSON-serializable payload.
    pub fn emit(&self, name: &str, payload: impl Serialize) {
        let payload = serde_json::to_value(payload).unwrap_or(Value::Null);
        let event = Event::new(name, self.clock.now_millis(), payload);
        self.sink.record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FakeClock;
    use serde_json::json;

    #[test]
    fn envelope_matches_documented_shape() {
        let clock = FakeClock::new(1_000);
        let sink = MemorySink::new();
        let emitter = EventEmitter::new(&clock, &sink);

        emitter.emit("transfer_send_complete", json!({"fileSizeBytes": 10}));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let value: Value = serde_json::from_str(&events[0].to_json_line()).unwrap();
        assert_eq!(value["kind"], "peershare.event");
        assert_eq!(value["version"], 1);
        assert_eq!(value["event"], "transfer_send_complete");
        assert_eq!(value["timestamp"], 1_000);
        assert_eq!(value["payload"]["fileSizeBytes"], 10);
    }

    #[test]
    fn memory_sink_preserves_order_and_filters_by_name() {
        let clock = FakeClock::new(0);
        let sink = MemorySink::new();
        let emitter = EventEmitter::new(&clock, &sink);

        emitter.emit("a", json!({}));
        emitter.emit("b", json!({}));
        emitter.emit("a", json!({}));

        assert_eq!(sink.event_names(), vec!["a", "b", "a"]);
        assert_eq!(sink.events_named("a").len(), 2);
    }
}
