use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CallId, ToolCallId};

/// One record of the run's flat event log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Position in the log, assigned on append.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    /// Delegation depth of the producing invocation (0 = entry agent).
    pub depth: u32,
    #[serde(flatten)]
    pub kind: AgentEventKind,
}

/// Runtime steps recorded in the event log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEventKind {
    /// A model call. `error` holds the provider error kind when it failed.
    ProviderCall {
        provider: String,
        turn: u32,
        tool_calls: usize,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A dispatched local tool (or an unknown name).
    ToolCall {
        tool_call_id: ToolCallId,
        tool: String,
        is_error: bool,
        duration_ms: u64,
    },
    AgentCall {
        target: String,
        call_id: CallId,
    },
    AgentReturn {
        target: String,
        call_id: CallId,
        duration_ms: u64,
    },
    Finish {
        turns: u32,
    },
    Error {
        kind: String,
        message: String,
    },
}

impl AgentEventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ProviderCall { .. } => "provider_call",
            Self::ToolCall { .. } => "tool_call",
            Self::AgentCall { .. } => "agent_call",
            Self::AgentReturn { .. } => "agent_return",
            Self::Finish { .. } => "finish",
            Self::Error { .. } => "error",
        }
    }
}

impl AgentEvent {
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }
}
