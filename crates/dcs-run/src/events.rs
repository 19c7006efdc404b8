//! # Run Event Log
//!
//! Append-only per-run events, serialized in emission order. Events are
//! observability data: timestamps are recorded but never participate in any
//! fingerprint or cached output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded run event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Monotonic sequence number within the run, starting at 1.
    pub sequence: u64,
    /// Event type, e.g. `run.execution.started`.
    pub event_type: String,
    /// Structured payload.
    pub payload: serde_json::Value,
    /// Wall-clock emission time. Not part of any fingerprint.
    pub recorded_at: DateTime<Utc>,
}

/// Append-only event accumulator for one run.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<RunEvent>,
}

impl EventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, assigning the next sequence number.
    pub fn append(&mut self, event_type: &str, payload: serde_json::Value) -> u64 {
        let sequence = self.events.len() as u64 + 1;
        tracing::info!(event_type, sequence, "run event");
        self.events.push(RunEvent {
            sequence,
            event_type: event_type.to_string(),
            payload,
            recorded_at: Utc::now(),
        });
        sequence
    }

    /// Events in emission order.
    pub fn events(&self) -> &[RunEvent] {
        &self.events
    }

    /// Consume the log, returning the events.
    pub fn into_events(self) -> Vec<RunEvent> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_monotonic() {
        let mut log = EventLog::new();
        assert_eq!(log.append("run.created", serde_json::json!({})), 1);
        assert_eq!(log.append("run.execution.started", serde_json::json!({})), 2);
        assert_eq!(log.append("run.execution.completed", serde_json::json!({})), 3);
        let sequences: Vec<u64> = log.events().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn events_keep_emission_order() {
        let mut log = EventLog::new();
        log.append("first", serde_json::json!({"n": 1}));
        log.append("second", serde_json::json!({"n": 2}));
        let events = log.into_events();
        assert_eq!(events[0].event_type, "first");
        assert_eq!(events[1].event_type, "second");
    }
}
