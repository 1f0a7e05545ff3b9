//! Capability resolution and tool dispatch.
//!
//! The router owns the roster (agents, tools, providers) and the backend
//! cache. It answers three questions for the runtime: which tool schemas an
//! agent sees, which backend serves it, and what a tool call name refers to.
//! Delegation itself runs in the runtime; the router only resolves it.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use conclave_core::agent::Agent;
use conclave_core::context::{Attachment, ToolCall};
use conclave_core::errors::ProviderError;
use conclave_core::provider::{ProviderBackend, ProviderConfig};
use conclave_core::schema::{build_parameters_schema, Param, ParamKind};
use conclave_core::tools::{check_required, Tool, ToolError, ToolSchema};
use conclave_llm::BackendCache;
use futures::FutureExt;
use tracing::{error, warn};

use crate::error::RunError;
use crate::registry::ToolRegistry;
use crate::truncate::truncate_output;

const DELEGATE_PREFIX: &str = "call_";
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_MAX_OUTPUT: usize = 100_000;

/// Name of the synthetic tool that delegates to `agent`.
pub fn delegate_tool_name(agent: &str) -> String {
    format!("{DELEGATE_PREFIX}{agent}")
}

/// What a tool call name refers to, from one agent's point of view.
pub enum Dispatch {
    Tool(Arc<dyn Tool>),
    Delegate(Arc<Agent>),
    /// Not registered, or not permitted for the calling agent.
    Unknown,
}

/// Tool-role content produced by one dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutcome {
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachments: Vec::new(),
            is_error: false,
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            content: format!("Error: {message}"),
            attachments: Vec::new(),
            is_error: true,
        }
    }
}

pub struct Router {
    agents: BTreeMap<String, Arc<Agent>>,
    tools: ToolRegistry,
    providers: HashMap<String, ProviderConfig>,
    backends: Arc<BackendCache>,
    /// Per agent: permitted tool schemas followed by delegate schemas.
    schemas: HashMap<String, Arc<[ToolSchema]>>,
    /// Per agent: delegate tool name -> target agent.
    delegates: HashMap<String, HashMap<String, String>>,
    tool_timeout: Duration,
    max_tool_output: usize,
}

impl Router {
    /// Build a router, validating the roster.
    pub fn new(
        agents: Vec<Agent>,
        tools: Vec<Arc<dyn Tool>>,
        providers: Vec<ProviderConfig>,
        backends: Arc<BackendCache>,
    ) -> Result<Self, RunError> {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool)?;
        }

        let mut provider_map = HashMap::new();
        for provider in providers {
            if provider_map.contains_key(&provider.name) {
                return Err(RunError::DuplicateName(provider.name));
            }
            provider_map.insert(provider.name.clone(), provider);
        }

        let mut agent_map = BTreeMap::new();
        for agent in agents {
            if agent_map.contains_key(&agent.name) {
                return Err(RunError::DuplicateName(agent.name));
            }
            agent_map.insert(agent.name.clone(), Arc::new(agent));
        }

        for agent in agent_map.values() {
            if !provider_map.contains_key(&agent.provider) {
                return Err(RunError::UnknownProvider {
                    agent: agent.name.clone(),
                    provider: agent.provider.clone(),
                });
            }
            if let Some(tool) = agent.tools.named().find(|t| !registry.contains(t)) {
                return Err(RunError::UnknownTool {
                    agent: agent.name.clone(),
                    tool: tool.to_string(),
                });
            }
            if let Some(target) = agent.delegates.named().find(|a| !agent_map.contains_key(*a)) {
                return Err(RunError::UnknownAgent(target.to_string()));
            }
        }

        for name in agent_map.keys() {
            let synthetic = delegate_tool_name(name);
            if registry.contains(&synthetic) {
                return Err(RunError::DuplicateName(synthetic));
            }
        }

        let mut schemas = HashMap::new();
        let mut delegates = HashMap::new();
        for agent in agent_map.values() {
            let mut list = registry.definitions_for(&agent.tools);
            let mut targets = HashMap::new();
            for target in agent_map.values().filter(|t| agent.delegates.permits(&t.name)) {
                let schema = delegate_schema(target);
                targets.insert(schema.name.clone(), target.name.clone());
                list.push(schema);
            }
            schemas.insert(agent.name.clone(), Arc::from(list));
            delegates.insert(agent.name.clone(), targets);
        }

        Ok(Self {
            agents: agent_map,
            tools: registry,
            providers: provider_map,
            backends,
            schemas,
            delegates,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            max_tool_output: DEFAULT_MAX_OUTPUT,
        })
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_max_tool_output(mut self, bytes: usize) -> Self {
        self.max_tool_output = bytes;
        self
    }

    pub fn agent(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    pub fn backends(&self) -> &Arc<BackendCache> {
        &self.backends
    }

    /// Tool schemas offered to `agent`: permitted tools sorted by name, then
    /// one delegate tool per permitted agent.
    pub fn tool_schemas(&self, agent: &str) -> Arc<[ToolSchema]> {
        self.schemas
            .get(agent)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Live backend for `agent`'s provider, configured on first use.
    pub async fn backend(
        &self,
        agent: &Agent,
    ) -> Result<(Arc<dyn ProviderBackend>, &ProviderConfig), RunError> {
        let provider = self
            .providers
            .get(&agent.provider)
            .ok_or_else(|| RunError::UnknownProvider {
                agent: agent.name.clone(),
                provider: agent.provider.clone(),
            })?;
        let backend = self
            .backends
            .get(provider)
            .await
            .map_err(|source: ProviderError| RunError::Provider {
                agent: agent.name.clone(),
                source,
            })?;
        Ok((backend, provider))
    }

    /// Resolve a tool call name for `agent`.
    pub fn resolve(&self, agent: &Agent, name: &str) -> Dispatch {
        if let Some(target) = self
            .delegates
            .get(&agent.name)
            .and_then(|targets| targets.get(name))
            .and_then(|target| self.agents.get(target))
        {
            return Dispatch::Delegate(Arc::clone(target));
        }
        if agent.tools.permits(name) {
            if let Some(tool) = self.tools.get(name) {
                return Dispatch::Tool(tool);
            }
        }
        Dispatch::Unknown
    }

    /// Execute a local tool. Every failure (unparsable or missing arguments,
    /// error return, panic, timeout) becomes an error outcome.
    pub async fn execute_tool(&self, tool: &Arc<dyn Tool>, call: &ToolCall) -> ToolOutcome {
        if call.is_unparsable() {
            let note = call.diagnostic.clone().unwrap_or_default();
            warn!(tool = %call.name, diagnostic = %note, "tool called with unparsable arguments");
            return ToolOutcome::error(ToolError::InvalidArguments(format!(
                "missing arguments, the call could not be parsed ({note})"
            )));
        }
        if let Some(schema) = self.tools.schema(&call.name) {
            if let Err(e) = check_required(schema, &call.arguments) {
                warn!(tool = %call.name, error = %e, "tool called without required arguments");
                return ToolOutcome::error(e);
            }
        }

        let result = tokio::time::timeout(
            self.tool_timeout,
            AssertUnwindSafe(tool.execute(call.arguments.clone())).catch_unwind(),
        )
        .await;

        match result {
            Ok(Ok(Ok(r))) => ToolOutcome {
                content: truncate_output(&r.content, self.max_tool_output),
                attachments: r.attachments,
                is_error: false,
            },
            Ok(Ok(Err(e))) => {
                warn!(tool = %call.name, kind = e.kind(), error = %e, "tool failed");
                ToolOutcome::error(truncate_output(&e.to_string(), self.max_tool_output))
            }
            Ok(Err(panic)) => {
                let msg = panic_message(&panic);
                error!(tool = %call.name, panic = %msg, "tool panicked during execution");
                ToolOutcome::error(ToolError::ExecutionFailed("tool crashed".into()))
            }
            Err(_) => {
                warn!(
                    tool = %call.name,
                    timeout_ms = self.tool_timeout.as_millis() as u64,
                    "tool timed out"
                );
                ToolOutcome::error(ToolError::Timeout(self.tool_timeout))
            }
        }
    }
}

fn delegate_schema(target: &Agent) -> ToolSchema {
    let params = [Param::required("message", ParamKind::String)
        .describe("Task or question for the agent")];
    ToolSchema {
        name: delegate_tool_name(&target.name),
        description: format!("Delegate to agent '{}': {}", target.name, target.instructions),
        parameters: build_parameters_schema(&params),
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
