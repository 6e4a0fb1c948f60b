//! EventSink port - where progress goes.
//!
//! The CLI prints events as phase lines on stdout; tests record them.

use std::sync::{Arc, Mutex};

use crate::domain::MigrationEvent;

/// EventSink receives migration events in order.
///
/// Emission must not fail the migration, so `emit` has no error channel.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &MigrationEvent);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &MigrationEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<MigrationEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MigrationEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: &MigrationEvent) {
        (**self).emit(event)
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &MigrationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
