use std::time::Duration;

use crate::ids::CallId;

/// Vendor-agnostic classification of a provider failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
    // Fatal, not retried
    Authentication,
    InvalidRequest,
    /// The vendor answered but produced no usable completion.
    EmptyResponse,
    UnknownKind,

    // Retryable
    RateLimited { retry_after: Option<Duration> },
    Server { status: u16 },
    Overloaded,
    Network,
    StreamInterrupted,

    // Operational
    Timeout(Duration),
}

/// Failure at the provider boundary, scoped to a provider name.
#[derive(Clone, Debug, thiserror::Error)]
#[error("provider '{provider}' failed ({kind}): {message}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication_failed",
            Self::InvalidRequest => "invalid_request",
            Self::EmptyResponse => "empty_response",
            Self::UnknownKind => "unknown_kind",
            Self::RateLimited { .. } => "rate_limited",
            Self::Server { .. } => "server_error",
            Self::Overloaded => "provider_overloaded",
            Self::Network => "network_error",
            Self::StreamInterrupted => "stream_interrupted",
            Self::Timeout(_) => "timeout",
        }
    }
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn empty_response(provider: impl Into<String>) -> Self {
        Self::new(
            provider,
            ProviderErrorKind::EmptyResponse,
            "Empty response: no choices returned",
        )
    }

    pub fn timeout(provider: impl Into<String>, after: Duration) -> Self {
        Self::new(
            provider,
            ProviderErrorKind::Timeout(after),
            format!("no response within {after:?}"),
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::RateLimited { .. }
                | ProviderErrorKind::Server { .. }
                | ProviderErrorKind::Overloaded
                | ProviderErrorKind::Network
                | ProviderErrorKind::StreamInterrupted
                | ProviderErrorKind::Timeout(_)
        )
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        match self.kind {
            ProviderErrorKind::RateLimited { retry_after } => retry_after,
            _ => None,
        }
    }

    pub fn error_kind(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Classify an HTTP status code. Adapters call this on non-2xx replies.
    pub fn from_status(provider: impl Into<String>, status: u16, body: String) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Authentication,
            400 => ProviderErrorKind::InvalidRequest,
            429 => ProviderErrorKind::RateLimited { retry_after: None },
            529 => ProviderErrorKind::Overloaded,
            500..=599 => ProviderErrorKind::Server { status },
            _ => {
                return Self::new(
                    provider,
                    ProviderErrorKind::InvalidRequest,
                    format!("unexpected status {status}: {body}"),
                )
            }
        };
        Self::new(provider, kind, body)
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Violations of the forward/return delegation protocol.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("return message '{call_id}' has no matching forward")]
    UnmatchedReturn { call_id: CallId },
    #[error("forward message '{call_id}' was issued twice")]
    DuplicateForward { call_id: CallId },
    #[error("message '{call_id}' is a {found} message, expected {expected}")]
    WrongKind {
        call_id: CallId,
        expected: &'static str,
        found: &'static str,
    },
}
