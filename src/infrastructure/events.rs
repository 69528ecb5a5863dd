use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Logs every event at `info`. The default when nothing consumes events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventPublisher;

impl EventPublisher for TracingEventPublisher {
    fn publish(&self, event: DomainEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => tracing::info!(event = event.name(), %payload, "domain event"),
            Err(e) => tracing::warn!(event = event.name(), error = %e, "unserializable domain event"),
        }
    }
}

/// Hands events to a bounded channel without waiting.
///
/// A full or closed channel drops the event with a warning; the operation
/// that produced it has already committed.
#[derive(Debug, Clone)]
pub struct ChannelEventPublisher {
    tx: mpsc::Sender<DomainEvent>,
}

impl ChannelEventPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DomainEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventPublisher for ChannelEventPublisher {
    fn publish(&self, event: DomainEvent) {
        let name = event.name();
        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!(event = name, error = %e, "dropping domain event");
        }
    }
}

/// Keeps every published event in memory, for inspection in tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingEventPublisher {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(DomainEvent::name).collect()
    }
}

impl EventPublisher for RecordingEventPublisher {
    fn publish(&self, event: DomainEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
