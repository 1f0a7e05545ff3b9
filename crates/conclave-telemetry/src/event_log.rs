use chrono::Utc;
use conclave_core::events::{AgentEvent, AgentEventKind};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Flat, append-only, insertion-ordered record of runtime steps.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<AgentEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event and return its sequence number.
    pub fn append(&self, agent: &str, depth: u32, kind: AgentEventKind) -> u64 {
        let mut events = self.events.lock();
        let seq = events.len() as u64;
        events.push(AgentEvent {
            seq,
            timestamp: Utc::now(),
            agent: agent.to_string(),
            depth,
            kind,
        });
        seq
    }

    pub fn snapshot(&self) -> Vec<AgentEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events of the given type (e.g. "provider_call").
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    /// `(agent, event_type)` pairs in log order.
    pub fn sequence(&self) -> Vec<(String, &'static str)> {
        self.events
            .lock()
            .iter()
            .map(|e| (e.agent.clone(), e.event_type()))
            .collect()
    }

    pub fn export(&self) -> Value {
        json!({ "events": self.snapshot() })
    }
}
