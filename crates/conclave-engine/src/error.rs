use conclave_core::errors::{ProtocolError, ProviderError};

/// Fatal run failures and roster errors raised while building a router.
///
/// Tool failures never appear here: they are fed back to the model as
/// tool-role entries.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("agent '{agent}': {source}")]
    Provider {
        agent: String,
        #[source]
        source: ProviderError,
    },

    #[error("delegation to '{agent}' exceeds max depth ({depth} > {max})")]
    DelegationDepthExceeded { agent: String, depth: u32, max: u32 },

    #[error("agent '{agent}' exceeded {limit} iterations")]
    IterationLimitExceeded { agent: String, limit: u32 },

    #[error("agent '{agent}': {source}")]
    Protocol {
        agent: String,
        #[source]
        source: ProtocolError,
    },

    #[error("run cancelled in agent '{agent}'")]
    Cancelled { agent: String },

    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    #[error("agent '{agent}' uses unknown provider '{provider}'")]
    UnknownProvider { agent: String, provider: String },

    #[error("agent '{agent}' permits unknown tool '{tool}'")]
    UnknownTool { agent: String, tool: String },

    #[error("duplicate name '{0}'")]
    DuplicateName(String),
}

impl RunError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider { .. } => "provider_error",
            Self::DelegationDepthExceeded { .. } => "delegation_depth_exceeded",
            Self::IterationLimitExceeded { .. } => "iteration_limit_exceeded",
            Self::Protocol {
                source: ProtocolError::UnmatchedReturn { .. },
                ..
            } => "unmatched_return",
            Self::Protocol { .. } => "protocol_error",
            Self::Cancelled { .. } => "cancelled",
            Self::UnknownAgent(_) => "unknown_agent",
            Self::UnknownProvider { .. } => "unknown_provider",
            Self::UnknownTool { .. } => "unknown_tool",
            Self::DuplicateName(_) => "duplicate_name",
        }
    }

    /// Only provider and network failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Agent the failure originated in, when there is one.
    pub fn agent(&self) -> Option<&str> {
        match self {
            Self::Provider { agent, .. }
            | Self::DelegationDepthExceeded { agent, .. }
            | Self::IterationLimitExceeded { agent, .. }
            | Self::Protocol { agent, .. }
            | Self::Cancelled { agent }
            | Self::UnknownProvider { agent, .. }
            | Self::UnknownTool { agent, .. } => Some(agent),
            Self::UnknownAgent(name) => Some(name),
            Self::DuplicateName(_) => None,
        }
    }
}
