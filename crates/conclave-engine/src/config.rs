use std::time::Duration;

use conclave_settings::RuntimeSettings;

/// Limits applied to every run of a [`Runtime`](crate::Runtime).
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Model calls allowed per agent invocation.
    pub max_iterations: u32,
    /// The entry agent runs at depth 0; each delegation adds one.
    pub max_delegation_depth: u32,
    pub provider_timeout: Option<Duration>,
    pub tool_timeout: Duration,
    pub parallel_tool_calls: bool,
    pub stream_buffer: usize,
    pub max_tool_output_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from(&RuntimeSettings::default())
    }
}

impl From<&RuntimeSettings> for RuntimeConfig {
    fn from(s: &RuntimeSettings) -> Self {
        Self {
            max_iterations: s.max_iterations,
            max_delegation_depth: s.max_delegation_depth,
            provider_timeout: s.provider_timeout_ms.map(Duration::from_millis),
            tool_timeout: Duration::from_millis(s.tool_timeout_ms),
            parallel_tool_calls: s.parallel_tool_calls,
            stream_buffer: s.stream_buffer.max(1),
            max_tool_output_bytes: s.max_tool_output_bytes,
        }
    }
}
