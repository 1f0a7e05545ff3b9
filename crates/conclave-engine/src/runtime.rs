//! The agent loop.
//!
//! One invocation drives an agent through model turns until a response
//! carries no tool calls:
//!
//! AwaitingModel → ModelResponded → (DispatchingTools → AwaitingModel)* → Done
//!
//! Any step can end in Failed. Delegation runs a nested invocation of the
//! target agent with a fresh context, one level deeper. All invocations of a
//! run share one [`RunScope`]: trace, event log, call ledger, cancellation
//! token and (when streaming) the event sink.

use std::sync::Arc;
use std::time::Instant;

use conclave_core::agent::Agent;
use conclave_core::context::{Attachment, Context, ToolCall};
use conclave_core::errors::{ProviderError, ProviderErrorKind};
use conclave_core::events::AgentEventKind;
use conclave_core::ids::{RunId, SpanId};
use conclave_core::message::{CallLedger, Message};
use conclave_core::provider::{LlmResponse, ProviderBackend, ProviderChunk, ProviderConfig};
use conclave_core::stream::{ErrorInfo, StreamEvent};
use conclave_core::tools::{ToolError, ToolSchema};
use conclave_telemetry::{ActiveSpan, EventLog, Trace};
use futures::future::{try_join_all, BoxFuture};
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::RuntimeConfig;
use crate::error::RunError;
use crate::router::{Dispatch, Router, ToolOutcome};
use crate::stream::RunStream;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    AwaitingModel,
    ModelResponded,
    DispatchingTools,
    Done,
    Failed,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingModel => "awaiting_model",
            Self::ModelResponded => "model_responded",
            Self::DispatchingTools => "dispatching_tools",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Counts of the steps a run took.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub provider_calls: usize,
    pub tool_calls: usize,
    pub delegations: usize,
}

impl RunStats {
    fn from_log(log: &EventLog) -> Self {
        Self {
            provider_calls: log.count("provider_call"),
            tool_calls: log.count("tool_call"),
            delegations: log.count("agent_call"),
        }
    }
}

/// Outcome of a completed run.
pub struct RunResult {
    pub run_id: RunId,
    /// Final text of the entry agent. Empty when the model returned none.
    pub content: String,
    /// The entry agent's transcript. Pass it to [`Runtime::resume`] to continue.
    pub context: Context,
    /// Every forward/return exchanged during the run, in issue order.
    pub messages: Vec<Message>,
    pub trace: Arc<Trace>,
    pub events: Arc<EventLog>,
    pub stats: RunStats,
}

impl std::fmt::Debug for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunResult")
            .field("run_id", &self.run_id)
            .field("content", &self.content)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

struct RunScope {
    trace: Arc<Trace>,
    events: Arc<EventLog>,
    ledger: CallLedger,
    cancel: CancellationToken,
    sink: Option<mpsc::Sender<StreamEvent>>,
}

impl RunScope {
    fn new(cancel: CancellationToken, sink: Option<mpsc::Sender<StreamEvent>>) -> Self {
        Self {
            trace: Trace::new(),
            events: Arc::new(EventLog::new()),
            ledger: CallLedger::new(),
            cancel,
            sink,
        }
    }

    fn is_streaming(&self) -> bool {
        self.sink.is_some()
    }

    async fn emit(&self, event: StreamEvent) {
        if let Some(sink) = &self.sink {
            let event_type = event.event_type();
            if sink.send(event).await.is_err() {
                warn!(event_type, "no stream receiver, event dropped");
            }
        }
    }
}

struct Completion {
    content: String,
    context: Context,
    turns: u32,
}

/// Drives runs over a shared, read-only [`Router`].
#[derive(Clone)]
pub struct Runtime {
    router: Arc<Router>,
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(router: Router, config: RuntimeConfig) -> Self {
        let router = router
            .with_tool_timeout(config.tool_timeout)
            .with_max_tool_output(config.max_tool_output_bytes);
        Self {
            router: Arc::new(router),
            config,
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run `entry` on a new conversation until it produces a final answer.
    pub async fn run(&self, entry: &str, message: impl Into<String>) -> Result<RunResult, RunError> {
        self.run_with_cancel(entry, message, CancellationToken::new())
            .await
    }

    pub async fn run_with_cancel(
        &self,
        entry: &str,
        message: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<RunResult, RunError> {
        let scope = RunScope::new(cancel, None);
        self.execute(entry, None, message.into(), Vec::new(), scope)
            .await
    }

    /// Like [`run`](Self::run), with attachments on the user message.
    pub async fn run_with_attachments(
        &self,
        entry: &str,
        message: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<RunResult, RunError> {
        let scope = RunScope::new(CancellationToken::new(), None);
        self.execute(entry, None, message.into(), attachments, scope)
            .await
    }

    /// Continue a conversation from a transcript returned by an earlier run.
    pub async fn resume(
        &self,
        entry: &str,
        context: Context,
        message: impl Into<String>,
    ) -> Result<RunResult, RunError> {
        self.resume_with_cancel(entry, context, message, CancellationToken::new())
            .await
    }

    pub async fn resume_with_cancel(
        &self,
        entry: &str,
        context: Context,
        message: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<RunResult, RunError> {
        let scope = RunScope::new(cancel, None);
        self.execute(entry, Some(context), message.into(), Vec::new(), scope)
            .await
    }

    /// Run on a worker task, yielding progress events as they happen.
    pub fn execute_stream(&self, entry: &str, message: impl Into<String>) -> RunStream {
        self.execute_stream_with_cancel(entry, message, CancellationToken::new())
    }

    /// Cancelling `cancel` ends the run with a terminal `error` event.
    /// Dropping the returned stream cancels the run without touching `cancel`.
    pub fn execute_stream_with_cancel(
        &self,
        entry: &str,
        message: impl Into<String>,
        cancel: CancellationToken,
    ) -> RunStream {
        let (tx, rx) = mpsc::channel(self.config.stream_buffer.max(1));
        let run_cancel = cancel.child_token();
        let guard = run_cancel.clone().drop_guard();
        let runtime = self.clone();
        let entry = entry.to_string();
        let message = message.into();

        tokio::spawn(async move {
            let scope = RunScope::new(run_cancel, Some(tx));
            if let Err(e) = runtime
                .execute(&entry, None, message, Vec::new(), scope)
                .await
            {
                debug!(error = %e, "streaming run ended with error");
            }
        });

        RunStream::new(ReceiverStream::new(rx), guard)
    }

    #[instrument(skip_all, fields(entry = %entry, streaming = scope.is_streaming()))]
    async fn execute(
        &self,
        entry: &str,
        context: Option<Context>,
        message: String,
        attachments: Vec<Attachment>,
        scope: RunScope,
    ) -> Result<RunResult, RunError> {
        let run_id = RunId::new();
        let root = scope.trace.open(
            "run",
            None,
            &[("run_id", json!(run_id.as_str())), ("entry", json!(entry))],
        );
        info!(run_id = %run_id, "run started");

        let result = match self.router.agent(entry) {
            Some(agent) => {
                let mut context = context.unwrap_or_else(|| Context::new(&agent.instructions));
                context.add_user(message, attachments);
                self.invoke(&scope, agent, context, 0, root.id().clone())
                    .await
            }
            None => Err(RunError::UnknownAgent(entry.to_string())),
        };

        match result {
            Ok(done) => {
                scope
                    .events
                    .append(entry, 0, AgentEventKind::Finish { turns: done.turns });
                root.set_attribute("status", json!("done"));
                drop(root);
                info!(run_id = %run_id, turns = done.turns, "run finished");
                scope
                    .emit(StreamEvent::Finish {
                        agent: entry.to_string(),
                        content: done.content.clone(),
                    })
                    .await;
                Ok(RunResult {
                    run_id,
                    content: done.content,
                    context: done.context,
                    messages: scope.ledger.messages(),
                    stats: RunStats::from_log(&scope.events),
                    trace: scope.trace,
                    events: scope.events,
                })
            }
            Err(err) => {
                scope.events.append(
                    entry,
                    0,
                    AgentEventKind::Error {
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    },
                );
                root.set_attribute("status", json!("failed"));
                root.set_attribute("error", json!(err.kind()));
                drop(root);
                warn!(run_id = %run_id, kind = err.kind(), error = %err, "run failed");
                scope
                    .emit(StreamEvent::Error {
                        agent: err.agent().unwrap_or(entry).to_string(),
                        error: ErrorInfo::new(err.kind(), err.to_string()),
                    })
                    .await;
                Err(err)
            }
        }
    }

    /// One agent invocation. Boxed because delegation recurses through it.
    fn invoke<'a>(
        &'a self,
        scope: &'a RunScope,
        agent: Arc<Agent>,
        context: Context,
        depth: u32,
        parent: SpanId,
    ) -> BoxFuture<'a, Result<Completion, RunError>> {
        async move {
            let span = scope.trace.open(
                "agent",
                Some(&parent),
                &[("agent", json!(agent.name)), ("depth", json!(depth))],
            );
            let mut phase = Phase::AwaitingModel;
            let result = self
                .agent_loop(scope, &agent, context, depth, &span, &mut phase)
                .await;
            if result.is_err() {
                span.set_attribute("failed_in", json!(phase.as_str()));
                phase = Phase::Failed;
            }
            span.set_attribute("phase", json!(phase.as_str()));
            debug!(agent = %agent.name, depth, phase = phase.as_str(), "invocation ended");
            result
        }
        .boxed()
    }

    async fn agent_loop(
        &self,
        scope: &RunScope,
        agent: &Agent,
        mut context: Context,
        depth: u32,
        span: &ActiveSpan,
        phase: &mut Phase,
    ) -> Result<Completion, RunError> {
        let tools = self.router.tool_schemas(&agent.name);

        for turn in 1..=self.config.max_iterations {
            *phase = Phase::AwaitingModel;
            if scope.cancel.is_cancelled() {
                return Err(RunError::Cancelled {
                    agent: agent.name.clone(),
                });
            }

            let response = self
                .model_turn(scope, agent, &context, &tools, depth, turn, span.id())
                .await?;
            *phase = Phase::ModelResponded;

            if !response.has_tool_calls() {
                let content = response.content.unwrap_or_default();
                context.add_assistant_text(content.clone());
                *phase = Phase::Done;
                span.set_attribute("turns", json!(turn));
                return Ok(Completion {
                    content,
                    context,
                    turns: turn,
                });
            }

            let LlmResponse {
                content,
                tool_calls,
            } = response;
            context.add_assistant_tool_calls(tool_calls.clone(), content);

            *phase = Phase::DispatchingTools;
            let outcomes = self
                .dispatch_all(scope, agent, depth, span.id(), &tool_calls)
                .await?;
            for (call, outcome) in tool_calls.into_iter().zip(outcomes) {
                context.add_tool_result(call.id, call.name, outcome.content, outcome.attachments);
            }
        }

        warn!(agent = %agent.name, limit = self.config.max_iterations, "iteration limit reached");
        Err(RunError::IterationLimitExceeded {
            agent: agent.name.clone(),
            limit: self.config.max_iterations,
        })
    }

    /// One model call, bounded by the provider timeout and the run's
    /// cancellation token.
    #[allow(clippy::too_many_arguments)]
    async fn model_turn(
        &self,
        scope: &RunScope,
        agent: &Agent,
        context: &Context,
        tools: &[ToolSchema],
        depth: u32,
        turn: u32,
        parent: &SpanId,
    ) -> Result<LlmResponse, RunError> {
        let (backend, provider) = self.router.backend(agent).await?;
        let span = scope.trace.open(
            "provider_call",
            Some(parent),
            &[
                ("agent", json!(agent.name)),
                ("provider", json!(provider.name)),
                ("model", json!(agent.model)),
                ("turn", json!(turn)),
            ],
        );
        let started = Instant::now();

        let request = self.request(scope, backend.as_ref(), context, tools, agent, provider);
        let bounded = async {
            match self.config.provider_timeout {
                Some(limit) => match tokio::time::timeout(limit, request).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::timeout(&provider.name, limit)),
                },
                None => request.await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = scope.cancel.cancelled() => {
                return Err(RunError::Cancelled { agent: agent.name.clone() });
            }
            result = bounded => result,
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        let response = match result {
            Ok(response) => response,
            Err(source) => {
                span.set_attribute("error", json!(source.error_kind()));
                scope.events.append(
                    &agent.name,
                    depth,
                    AgentEventKind::ProviderCall {
                        provider: provider.name.clone(),
                        turn,
                        tool_calls: 0,
                        duration_ms,
                        error: Some(source.error_kind().to_string()),
                    },
                );
                return Err(RunError::Provider {
                    agent: agent.name.clone(),
                    source,
                });
            }
        };

        span.set_attribute("tool_calls", json!(response.tool_calls.len()));
        scope.events.append(
            &agent.name,
            depth,
            AgentEventKind::ProviderCall {
                provider: provider.name.clone(),
                turn,
                tool_calls: response.tool_calls.len(),
                duration_ms,
                error: None,
            },
        );
        debug!(
            agent = %agent.name,
            provider = %provider.name,
            turn,
            tool_calls = response.tool_calls.len(),
            duration_ms,
            "provider call complete"
        );
        Ok(response)
    }

    /// `call` for plain runs; `stream` with tokens forwarded as they arrive
    /// for streaming runs.
    async fn request(
        &self,
        scope: &RunScope,
        backend: &dyn ProviderBackend,
        context: &Context,
        tools: &[ToolSchema],
        agent: &Agent,
        provider: &ProviderConfig,
    ) -> Result<LlmResponse, ProviderError> {
        if !scope.is_streaming() {
            return backend.call(context, tools, agent, provider).await;
        }

        let mut chunks = backend.stream(context, tools, agent, provider).await?;
        let mut last = None;
        while let Some(chunk) = chunks.next().await {
            match chunk? {
                ProviderChunk::Text(text) if text.is_empty() => {}
                ProviderChunk::Text(text) => {
                    scope
                        .emit(StreamEvent::Token {
                            agent: agent.name.clone(),
                            text,
                        })
                        .await;
                }
                ProviderChunk::Done(response) => last = Some(response),
            }
        }
        last.ok_or_else(|| {
            ProviderError::new(
                &provider.name,
                ProviderErrorKind::StreamInterrupted,
                "stream ended without a final response",
            )
        })
    }

    /// Dispatch one turn's calls. Siblings may run concurrently; outcomes
    /// come back in call order.
    async fn dispatch_all(
        &self,
        scope: &RunScope,
        agent: &Agent,
        depth: u32,
        parent: &SpanId,
        calls: &[ToolCall],
    ) -> Result<Vec<ToolOutcome>, RunError> {
        for call in calls {
            scope
                .emit(StreamEvent::ToolCall {
                    agent: agent.name.clone(),
                    call: call.clone(),
                })
                .await;
        }

        if self.config.parallel_tool_calls && calls.len() > 1 {
            try_join_all(
                calls
                    .iter()
                    .map(|call| self.dispatch(scope, agent, depth, parent, call)),
            )
            .await
        } else {
            let mut outcomes = Vec::with_capacity(calls.len());
            for call in calls {
                outcomes.push(self.dispatch(scope, agent, depth, parent, call).await?);
            }
            Ok(outcomes)
        }
    }

    async fn dispatch(
        &self,
        scope: &RunScope,
        agent: &Agent,
        depth: u32,
        parent: &SpanId,
        call: &ToolCall,
    ) -> Result<ToolOutcome, RunError> {
        let tool = match self.router.resolve(agent, &call.name) {
            Dispatch::Delegate(target) => {
                return self
                    .delegate(scope, agent, target, depth, parent, call)
                    .await;
            }
            Dispatch::Tool(tool) => Some(tool),
            Dispatch::Unknown => None,
        };

        let span = scope.trace.open(
            "tool",
            Some(parent),
            &[
                ("agent", json!(agent.name)),
                ("tool", json!(call.name)),
                ("tool_call_id", json!(call.id.as_str())),
            ],
        );
        let started = Instant::now();

        let outcome = match tool {
            Some(tool) => {
                tokio::select! {
                    biased;
                    _ = scope.cancel.cancelled() => {
                        return Err(RunError::Cancelled { agent: agent.name.clone() });
                    }
                    outcome = self.router.execute_tool(&tool, call) => outcome,
                }
            }
            None => {
                warn!(agent = %agent.name, tool = %call.name, "unknown tool requested");
                ToolOutcome::error(format!("unknown tool '{}'", call.name))
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        span.set_attribute("is_error", Value::Bool(outcome.is_error));
        scope.events.append(
            &agent.name,
            depth,
            AgentEventKind::ToolCall {
                tool_call_id: call.id.clone(),
                tool: call.name.clone(),
                is_error: outcome.is_error,
                duration_ms,
            },
        );
        Ok(outcome)
    }

    /// Run `target` as a tool of `caller`, correlated by a forward/return pair.
    async fn delegate(
        &self,
        scope: &RunScope,
        caller: &Agent,
        target: Arc<Agent>,
        depth: u32,
        parent: &SpanId,
        call: &ToolCall,
    ) -> Result<ToolOutcome, RunError> {
        let Some(message) = delegate_message(call) else {
            let err = ToolError::MissingArguments {
                tool: call.name.clone(),
                missing: vec!["message".to_string()],
            };
            warn!(agent = %caller.name, tool = %call.name, "delegation without a message");
            return Ok(ToolOutcome::error(err));
        };

        let next_depth = depth + 1;
        if next_depth > self.config.max_delegation_depth {
            return Err(RunError::DelegationDepthExceeded {
                agent: target.name.clone(),
                depth: next_depth,
                max: self.config.max_delegation_depth,
            });
        }

        let protocol = |source| RunError::Protocol {
            agent: caller.name.clone(),
            source,
        };
        let forward = Message::forward(&caller.name, &target.name, &message);
        scope.ledger.issue(&forward).map_err(protocol)?;

        let span = scope.trace.open(
            "delegate",
            Some(parent),
            &[
                ("agent", json!(caller.name)),
                ("target", json!(target.name)),
                ("call_id", json!(forward.call_id.as_str())),
            ],
        );
        scope.events.append(
            &caller.name,
            depth,
            AgentEventKind::AgentCall {
                target: target.name.clone(),
                call_id: forward.call_id.clone(),
            },
        );
        scope
            .emit(StreamEvent::AgentCall {
                agent: caller.name.clone(),
                target: target.name.clone(),
                call_id: forward.call_id.clone(),
                message: message.clone(),
            })
            .await;
        info!(
            agent = %caller.name,
            target = %target.name,
            call_id = %forward.call_id,
            depth = next_depth,
            "delegating"
        );

        let started = Instant::now();
        let mut context = Context::new(&target.instructions);
        context.add_user(message, Vec::new());
        let done = self
            .invoke(scope, Arc::clone(&target), context, next_depth, span.id().clone())
            .await?;

        let reply = Message::reply_to(&forward, &done.content);
        scope.ledger.complete(&reply).map_err(protocol)?;

        scope.events.append(
            &caller.name,
            depth,
            AgentEventKind::AgentReturn {
                target: target.name.clone(),
                call_id: reply.call_id.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        );
        scope
            .emit(StreamEvent::AgentReturn {
                agent: caller.name.clone(),
                target: target.name.clone(),
                call_id: reply.call_id.clone(),
                content: done.content.clone(),
            })
            .await;
        Ok(ToolOutcome::text(done.content))
    }
}

/// The `message` argument of a delegate call. Non-string values are passed
/// on as their JSON text.
fn delegate_message(call: &ToolCall) -> Option<String> {
    match call.arguments.get("message") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}
