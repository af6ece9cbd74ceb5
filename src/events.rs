//! Run events published to an external observation sink
//!
//! The control plane only writes to the sink; it never reads it back.
//! Observations carry the category-tagged message of a classified fault so
//! a reviewer of the event stream can tell transient LLM hiccups from
//! structural failures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fault::ErrorCategory;
use crate::session::SessionStatus;

/// Which side of the conversation produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Agent,
    ControlPlane,
}

/// Events emitted over the lifetime of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run was initiated with the given task.
    RunStarted { session_id: String, task: String },

    /// The session transitioned status.
    StatusChanged {
        session_id: String,
        status: SessionStatus,
    },

    /// A fault was classified; message is suitable for direct display.
    Observation {
        category: ErrorCategory,
        message: String,
    },

    /// Context window exceeded and condensation is enabled; the host
    /// should condense history before the next turn.
    CondensationRequested { session_id: String },

    /// The run reached a terminal status.
    RunFinished {
        session_id: String,
        status: SessionStatus,
        steps: u64,
    },
}

/// Write-only sink for run events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: Event, source: EventSource);
}

/// Sink that drops everything. Useful default for hosts without a stream.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn publish(&self, _event: Event, _source: EventSource) {}
}

/// Sink that records events in memory, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: std::sync::Mutex<Vec<(Event, EventSource)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events published so far, in order.
    pub fn events(&self) -> Vec<(Event, EventSource)> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn publish(&self, event: Event, source: EventSource) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push((event, source));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.publish(
            Event::RunStarted {
                session_id: "s1".into(),
                task: "do the thing".into(),
            },
            EventSource::ControlPlane,
        )
        .await;
        sink.publish(
            Event::Observation {
                category: ErrorCategory::RateLimit,
                message: "Rate limit reached.".into(),
            },
            EventSource::Agent,
        )
        .await;

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].0, Event::RunStarted { .. }));
        assert_eq!(events[1].1, EventSource::Agent);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = Event::CondensationRequested {
            session_id: "s1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "condensation_requested");
    }
}
