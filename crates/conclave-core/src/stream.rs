use serde::{Deserialize, Serialize};

use crate::context::ToolCall;
use crate::ids::CallId;

/// Progress events of a streaming run. Each carries the producing agent.
///
/// Ordering contract per run:
///
/// (Token | ToolCall | AgentCall | AgentReturn)* → (Finish | Error)
///
/// Nothing follows the terminal event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Token {
        agent: String,
        text: String,
    },
    ToolCall {
        agent: String,
        call: ToolCall,
    },
    /// `agent` delegates to `target`.
    AgentCall {
        agent: String,
        target: String,
        call_id: CallId,
        message: String,
    },
    /// `target` answered `agent`.
    AgentReturn {
        agent: String,
        target: String,
        call_id: CallId,
        content: String,
    },
    Finish {
        agent: String,
        content: String,
    },
    Error {
        agent: String,
        error: ErrorInfo,
    },
}

/// Serializable error payload for terminal `Error` events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. })
    }

    pub fn agent_name(&self) -> &str {
        match self {
            Self::Token { agent, .. }
            | Self::ToolCall { agent, .. }
            | Self::AgentCall { agent, .. }
            | Self::AgentReturn { agent, .. }
            | Self::Finish { agent, .. }
            | Self::Error { agent, .. } => agent,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::ToolCall { .. } => "tool_call",
            Self::AgentCall { .. } => "agent_call",
            Self::AgentReturn { .. } => "agent_return",
            Self::Finish { .. } => "finish",
            Self::Error { .. } => "error",
        }
    }
}
