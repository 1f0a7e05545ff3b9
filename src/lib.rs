//! # conclave
//!
//! Multi-agent runtime. Agents are LLM-backed workers that answer a message,
//! call tools, and delegate to each other through synthetic `call_<agent>`
//! tools. A run ends when the entry agent answers without tool calls.
//!
//! Two ways in:
//!
//! - [`run`] / [`run_stream`] for a one-off run over an explicit roster.
//! - [`Conclave`], a composition root built from [`ConclaveSettings`] that
//!   keeps its provider backends alive across runs.

#![deny(unsafe_code)]

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, Level};

pub use conclave_core::{
    Access, Agent, AgentEvent, AgentEventKind, Attachment, CallId, CallLedger, ChunkStream,
    Context, ContextMessage, ErrorInfo, FunctionTool, LlmResponse, Message, MessageKind, Param,
    ParamKind, ProtocolError, ProviderBackend, ProviderChunk, ProviderConfig, ProviderError,
    ProviderErrorKind, ReasoningEffort, Role, RunId, SpanId, StreamEvent, Tool, ToolCall,
    ToolCallId, ToolError, ToolResult, ToolSchema,
};
pub use conclave_engine::{
    delegate_tool_name, RunError, RunResult, RunStats, RunStream, Router, Runtime, RuntimeConfig,
};
pub use conclave_llm::{
    parse_tool_arguments, BackendCache, BackendFactory, MockBackend, MockResponse,
    ReliableBackend, ReliableConfig,
};
pub use conclave_settings::{
    load_settings_from_path, ConclaveSettings, LoggingSettings, ProviderSettings,
    RuntimeSettings, SettingsError,
};
pub use conclave_telemetry::{init_telemetry, EventLog, Span, TelemetryConfig, TelemetryError, Trace};
pub use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum ConclaveError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// Run `entry` once over an explicit roster with default limits.
///
/// `factory` maps each provider's `kind` to a backend constructor.
pub async fn run(
    entry: &str,
    message: impl Into<String>,
    agents: Vec<Agent>,
    tools: Vec<Arc<dyn Tool>>,
    providers: Vec<ProviderConfig>,
    factory: BackendFactory,
) -> Result<RunResult, RunError> {
    let runtime = build_runtime(agents, tools, providers, factory, RuntimeConfig::default())?;
    runtime.run(entry, message).await
}

/// Streaming form of [`run`]. Roster errors surface before any event.
pub fn run_stream(
    entry: &str,
    message: impl Into<String>,
    agents: Vec<Agent>,
    tools: Vec<Arc<dyn Tool>>,
    providers: Vec<ProviderConfig>,
    factory: BackendFactory,
) -> Result<RunStream, RunError> {
    let runtime = build_runtime(agents, tools, providers, factory, RuntimeConfig::default())?;
    Ok(runtime.execute_stream(entry, message))
}

fn build_runtime(
    agents: Vec<Agent>,
    tools: Vec<Arc<dyn Tool>>,
    providers: Vec<ProviderConfig>,
    factory: BackendFactory,
    config: RuntimeConfig,
) -> Result<Runtime, RunError> {
    let backends = Arc::new(BackendCache::new(factory));
    let router = Router::new(agents, tools, providers, backends)?;
    Ok(Runtime::new(router, config))
}

/// Long-lived runtime assembled from settings.
///
/// Backends are configured lazily on first use and reused across runs until
/// [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct Conclave {
    runtime: Runtime,
    settings: Arc<ConclaveSettings>,
}

impl Conclave {
    pub fn from_settings(
        settings: ConclaveSettings,
        tools: Vec<Arc<dyn Tool>>,
        factory: BackendFactory,
    ) -> Result<Self, ConclaveError> {
        let providers = settings
            .providers
            .iter()
            .map(ProviderSettings::resolve)
            .collect::<Result<Vec<_>, _>>()?;
        let config = RuntimeConfig::from(&settings.runtime);
        let runtime = build_runtime(settings.agents.clone(), tools, providers, factory, config)?;
        info!(
            agents = settings.agents.len(),
            providers = settings.providers.len(),
            "conclave assembled"
        );
        Ok(Self {
            runtime,
            settings: Arc::new(settings),
        })
    }

    /// Load settings from `path` (defaults when absent, then `CONCLAVE_*`
    /// overrides) and assemble.
    pub fn load(
        path: &Path,
        tools: Vec<Arc<dyn Tool>>,
        factory: BackendFactory,
    ) -> Result<Self, ConclaveError> {
        let settings = load_settings_from_path(path)?;
        Self::from_settings(settings, tools, factory)
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn settings(&self) -> &ConclaveSettings {
        &self.settings
    }

    /// Install the global subscriber from the logging section.
    pub fn init_logging(&self) -> Result<(), ConclaveError> {
        let config = telemetry_config(&self.settings.logging)?;
        init_telemetry(&config)?;
        Ok(())
    }

    pub async fn run(
        &self,
        entry: &str,
        message: impl Into<String>,
    ) -> Result<RunResult, RunError> {
        self.runtime.run(entry, message).await
    }

    pub async fn run_with_cancel(
        &self,
        entry: &str,
        message: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<RunResult, RunError> {
        self.runtime.run_with_cancel(entry, message, cancel).await
    }

    pub async fn resume(
        &self,
        entry: &str,
        context: Context,
        message: impl Into<String>,
    ) -> Result<RunResult, RunError> {
        self.runtime.resume(entry, context, message).await
    }

    pub fn run_stream(&self, entry: &str, message: impl Into<String>) -> RunStream {
        self.runtime.execute_stream(entry, message)
    }

    /// Drop every configured backend. Later runs configure them again.
    pub fn shutdown(&self) {
        let backends = self.runtime.router().backends();
        let configured = backends.len();
        backends.clear();
        info!(configured, "backends released");
    }
}

/// Map the logging section onto a [`TelemetryConfig`].
pub fn telemetry_config(logging: &LoggingSettings) -> Result<TelemetryConfig, ConclaveError> {
    let module_levels = logging
        .module_levels
        .iter()
        .map(|(module, level)| parse_level(level).map(|level| (module.clone(), level)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TelemetryConfig {
        log_level: parse_level(&logging.level)?,
        module_levels,
        json: logging.json,
    })
}

fn parse_level(level: &str) -> Result<Level, ConclaveError> {
    Level::from_str(level).map_err(|_| {
        ConclaveError::Settings(SettingsError::InvalidValue(format!(
            "'{level}' is not a log level"
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn mock_factory(mock: Arc<MockBackend>) -> BackendFactory {
        BackendFactory::new().with_backend("mock", mock)
    }

    fn settings_with(agents: Vec<Agent>) -> ConclaveSettings {
        ConclaveSettings {
            agents,
            providers: vec![ProviderSettings {
                name: "mock".into(),
                kind: "mock".into(),
                api_key: Some("sk-test".into()),
                api_key_env: None,
                base_url: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn telemetry_config_from_logging() {
        let logging = LoggingSettings {
            level: "warn".into(),
            module_levels: BTreeMap::from([("conclave_engine".to_string(), "debug".to_string())]),
            json: false,
        };
        let config = telemetry_config(&logging).unwrap();
        assert_eq!(config.log_level, Level::WARN);
        assert_eq!(config.module_levels, vec![("conclave_engine".to_string(), Level::DEBUG)]);
        assert!(!config.json);
        assert_eq!(config.filter_directive(), "warn,conclave_engine=debug");
    }

    #[test]
    fn telemetry_config_rejects_bad_level() {
        let logging = LoggingSettings {
            level: "loud".into(),
            ..Default::default()
        };
        assert!(matches!(
            telemetry_config(&logging),
            Err(ConclaveError::Settings(SettingsError::InvalidValue(_)))
        ));
    }

    #[tokio::test]
    async fn conclave_runs_from_settings() {
        let mock = Arc::new(MockBackend::new().with_default(vec![MockResponse::text("hello")]));
        let settings = settings_with(vec![Agent::new("a", "You are a.", "m", "mock")]);
        let conclave =
            Conclave::from_settings(settings, vec![], mock_factory(Arc::clone(&mock))).unwrap();

        let result = conclave.run("a", "hi").await.unwrap();
        assert_eq!(result.content, "hello");
        assert_eq!(conclave.runtime().router().backends().len(), 1);

        conclave.shutdown();
        assert!(conclave.runtime().router().backends().is_empty());
    }

    #[test]
    fn settings_limits_reach_runtime() {
        let mut settings = settings_with(vec![Agent::new("a", "i", "m", "mock")]);
        settings.runtime.max_iterations = 7;
        settings.runtime.parallel_tool_calls = false;
        let conclave = Conclave::from_settings(
            settings,
            vec![],
            mock_factory(Arc::new(MockBackend::new())),
        )
        .unwrap();
        assert_eq!(conclave.runtime().config().max_iterations, 7);
        assert!(!conclave.runtime().config().parallel_tool_calls);
    }

    #[test]
    fn missing_key_variable_fails_assembly() {
        let mut settings = settings_with(vec![]);
        settings.providers[0].api_key = None;
        settings.providers[0].api_key_env = Some("CONCLAVE_TEST_KEY_THAT_IS_NEVER_SET".into());
        let err = Conclave::from_settings(
            settings,
            vec![],
            mock_factory(Arc::new(MockBackend::new())),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            ConclaveError::Settings(SettingsError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn roster_errors_surface_as_run_errors() {
        let settings = settings_with(vec![Agent::new("a", "i", "m", "elsewhere")]);
        let err = Conclave::from_settings(
            settings,
            vec![],
            mock_factory(Arc::new(MockBackend::new())),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            ConclaveError::Run(RunError::UnknownProvider { .. })
        ));
    }
}
