use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use conclave_core::agent::Agent;
use conclave_core::context::{Context, ContextMessage, ToolCall};
use conclave_core::errors::{ProviderError, ProviderErrorKind};
use conclave_core::ids::ToolCallId;
use conclave_core::provider::{
    ChunkStream, LlmResponse, ProviderBackend, ProviderChunk, ProviderConfig,
};
use conclave_core::tools::ToolSchema;
use futures::stream;
use parking_lot::Mutex;
use serde_json::Value;

use crate::accumulate::ToolCallAccumulator;
use crate::arguments::parse_tool_arguments;

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// A complete response (text and/or tool calls).
    Response(LlmResponse),
    /// Stream these text chunks, then a response whose content is their concatenation.
    Chunks(Vec<String>, Vec<ToolCall>),
    /// Stream these chunks, then fail mid-stream.
    Interrupted(Vec<String>, ProviderError),
    /// A single tool call whose raw argument text goes through argument repair.
    RawToolArgs { name: String, raw: String },
    /// A single tool call whose arguments arrive in pieces, assembled the way
    /// a streaming adapter assembles vendor deltas.
    ToolFragments { name: String, fragments: Vec<String> },
    /// Fail the call itself.
    Error(ProviderError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
    /// Resolve the inner response forever; never consumed from the queue.
    Repeat(Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Response(LlmResponse::text(text))
    }

    /// One tool call with JSON arguments and a generated id.
    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self::Response(LlmResponse::tool_calls(vec![ToolCall::from_value(
            ToolCallId::new(),
            name,
            arguments,
        )]))
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::Response(LlmResponse::tool_calls(calls))
    }

    /// Ask the synthetic delegate tool for `agent` to run with `message`.
    pub fn delegate(agent: &str, message: impl Into<String>) -> Self {
        Self::tool_call(
            format!("call_{agent}"),
            serde_json::json!({ "message": message.into() }),
        )
    }

    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Chunks(chunks.into_iter().map(Into::into).collect(), Vec::new())
    }

    pub fn raw_tool_args(name: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::RawToolArgs {
            name: name.into(),
            raw: raw.into(),
        }
    }

    pub fn tool_fragments<I, S>(name: impl Into<String>, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::ToolFragments {
            name: name.into(),
            fragments: fragments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }

    pub fn repeat(inner: MockResponse) -> Self {
        Self::Repeat(Box::new(inner))
    }
}

/// What the mock saw on one call.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub agent: String,
    pub provider: String,
    pub system_prompt: String,
    pub messages: Vec<ContextMessage>,
    pub tools: Vec<String>,
    pub streamed: bool,
}

#[derive(Default)]
struct Script {
    by_agent: HashMap<String, VecDeque<MockResponse>>,
    default: VecDeque<MockResponse>,
}

/// Backend that replays scripted responses, per agent or from a shared queue.
///
/// A call from agent `x` takes the next response scripted for `x`, falling
/// back to the shared queue. Every call is recorded.
#[derive(Default)]
pub struct MockBackend {
    script: Mutex<Script>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(self, responses: Vec<MockResponse>) -> Self {
        self.script.lock().default.extend(responses);
        self
    }

    pub fn with_agent(self, agent: impl Into<String>, responses: Vec<MockResponse>) -> Self {
        self.script
            .lock()
            .by_agent
            .entry(agent.into())
            .or_default()
            .extend(responses);
        self
    }

    pub fn push(&self, agent: &str, response: MockResponse) {
        self.script
            .lock()
            .by_agent
            .entry(agent.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, agent: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.agent == agent)
            .cloned()
            .collect()
    }

    fn next(
        &self,
        context: &Context,
        tools: &[ToolSchema],
        agent: &Agent,
        provider: &ProviderConfig,
        streamed: bool,
    ) -> Result<MockResponse, ProviderError> {
        self.calls.lock().push(RecordedCall {
            agent: agent.name.clone(),
            provider: provider.name.clone(),
            system_prompt: context.system_prompt().to_string(),
            messages: context.messages(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
            streamed,
        });

        let mut guard = self.script.lock();
        let script = &mut *guard;
        let scripted = script
            .by_agent
            .get(&agent.name)
            .is_some_and(|q| !q.is_empty());
        let queue = if scripted {
            script.by_agent.get_mut(&agent.name)
        } else {
            Some(&mut script.default)
        };
        let response = queue.and_then(|q| match q.front() {
            Some(MockResponse::Repeat(inner)) => Some((**inner).clone()),
            _ => q.pop_front(),
        });
        response.ok_or_else(|| {
            ProviderError::new(
                &provider.name,
                ProviderErrorKind::InvalidRequest,
                format!("MockBackend: no response configured for agent '{}'", agent.name),
            )
        })
    }
}

/// Unroll delays and repeats into a terminal response.
async fn settle(mut response: MockResponse) -> MockResponse {
    loop {
        match response {
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                response = *inner;
            }
            MockResponse::Repeat(inner) => response = *inner,
            other => return other,
        }
    }
}

fn into_response(response: MockResponse) -> Result<LlmResponse, ProviderError> {
    match response {
        MockResponse::Response(r) => Ok(r),
        MockResponse::Chunks(chunks, tool_calls) => Ok(LlmResponse {
            content: Some(chunks.concat()),
            tool_calls,
        }),
        MockResponse::RawToolArgs { name, raw } => Ok(LlmResponse::tool_calls(vec![
            parse_tool_arguments(&raw).into_call(ToolCallId::new(), name),
        ])),
        MockResponse::ToolFragments { name, fragments } => {
            let mut acc = ToolCallAccumulator::new();
            for fragment in &fragments {
                acc.push(0, None, Some(&name), Some(fragment));
            }
            Ok(LlmResponse::tool_calls(acc.finish()))
        }
        MockResponse::Interrupted(_, e) | MockResponse::Error(e) => Err(e),
        MockResponse::Delay(_, inner) | MockResponse::Repeat(inner) => into_response(*inner),
    }
}

#[async_trait]
impl ProviderBackend for MockBackend {
    async fn call(
        &self,
        context: &Context,
        tools: &[ToolSchema],
        agent: &Agent,
        provider: &ProviderConfig,
    ) -> Result<LlmResponse, ProviderError> {
        let response = self.next(context, tools, agent, provider, false)?;
        into_response(settle(response).await)
    }

    async fn stream(
        &self,
        context: &Context,
        tools: &[ToolSchema],
        agent: &Agent,
        provider: &ProviderConfig,
    ) -> Result<ChunkStream, ProviderError> {
        let response = settle(self.next(context, tools, agent, provider, true)?).await;
        let items: Vec<Result<ProviderChunk, ProviderError>> = match response {
            MockResponse::Chunks(chunks, tool_calls) => {
                let content = chunks.concat();
                chunks
                    .into_iter()
                    .map(|c| Ok(ProviderChunk::Text(c)))
                    .chain(std::iter::once(Ok(ProviderChunk::Done(LlmResponse {
                        content: Some(content),
                        tool_calls,
                    }))))
                    .collect()
            }
            MockResponse::Interrupted(chunks, e) => chunks
                .into_iter()
                .map(|c| Ok(ProviderChunk::Text(c)))
                .chain(std::iter::once(Err(e)))
                .collect(),
            MockResponse::Error(e) => return Err(e),
            other => {
                let r = into_response(other)?;
                let mut items = Vec::with_capacity(2);
                if let Some(text) = r.content.as_ref().filter(|t| !t.is_empty()) {
                    items.push(Ok(ProviderChunk::Text(text.clone())));
                }
                items.push(Ok(ProviderChunk::Done(r)));
                items
            }
        };
        Ok(Box::pin(stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_stream::StreamExt;

    fn fixtures(agent: &str) -> (Context, Agent, ProviderConfig) {
        (
            Context::new("sys"),
            Agent::new(agent, "i", "m", "mock"),
            ProviderConfig::new("mock", "mock", "k"),
        )
    }

    #[tokio::test]
    async fn sequential_responses() {
        let mock = MockBackend::new().with_default(vec![
            MockResponse::text("first"),
            MockResponse::text("second"),
        ]);
        let (ctx, agent, p) = fixtures("a");
        let r1 = mock.call(&ctx, &[], &agent, &p).await.unwrap();
        let r2 = mock.call(&ctx, &[], &agent, &p).await.unwrap();
        assert_eq!(r1.content.as_deref(), Some("first"));
        assert_eq!(r2.content.as_deref(), Some("second"));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_responses() {
        let mock = MockBackend::new().with_default(vec![MockResponse::text("only one")]);
        let (ctx, agent, p) = fixtures("a");
        let _ = mock.call(&ctx, &[], &agent, &p).await;
        let err = mock.call(&ctx, &[], &agent, &p).await.unwrap_err();
        assert!(err.message.contains("no response configured"));
    }

    #[tokio::test]
    async fn per_agent_scripts_fall_back_to_default() {
        let mock = MockBackend::new()
            .with_agent("b", vec![MockResponse::text("from b")])
            .with_default(vec![MockResponse::text("shared")]);
        let (ctx, a, p) = fixtures("a");
        let (_, b, _) = fixtures("b");
        assert_eq!(
            mock.call(&ctx, &[], &b, &p).await.unwrap().content.as_deref(),
            Some("from b")
        );
        assert_eq!(
            mock.call(&ctx, &[], &a, &p).await.unwrap().content.as_deref(),
            Some("shared")
        );
        assert_eq!(mock.calls_for("b").len(), 1);
    }

    #[tokio::test]
    async fn repeat_is_never_exhausted() {
        let mock = MockBackend::new()
            .with_default(vec![MockResponse::repeat(MockResponse::tool_call("t", json!({})))]);
        let (ctx, agent, p) = fixtures("a");
        for _ in 0..5 {
            let r = mock.call(&ctx, &[], &agent, &p).await.unwrap();
            assert!(r.has_tool_calls());
        }
    }

    #[tokio::test]
    async fn chunked_stream() {
        let mock = MockBackend::new().with_default(vec![MockResponse::chunks(["hel", "lo"])]);
        let (ctx, agent, p) = fixtures("a");
        let items: Vec<_> = mock
            .stream(&ctx, &[], &agent, &p)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), &ProviderChunk::Text("hel".into()));
        match items[2].as_ref().unwrap() {
            ProviderChunk::Done(r) => assert_eq!(r.content.as_deref(), Some("hello")),
            other => panic!("expected Done, got {other:?}"),
        }
        assert!(mock.calls()[0].streamed);
    }

    #[tokio::test]
    async fn interrupted_stream_ends_with_error() {
        let err = ProviderError::new("mock", ProviderErrorKind::StreamInterrupted, "reset");
        let mock = MockBackend::new()
            .with_default(vec![MockResponse::Interrupted(vec!["par".into()], err)]);
        let (ctx, agent, p) = fixtures("a");
        let items: Vec<_> = mock
            .stream(&ctx, &[], &agent, &p)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn raw_arguments_are_repaired() {
        let mock = MockBackend::new()
            .with_default(vec![MockResponse::raw_tool_args("search", r#"{"q": "te"#)]);
        let (ctx, agent, p) = fixtures("a");
        let r = mock.call(&ctx, &[], &agent, &p).await.unwrap();
        assert_eq!(r.tool_calls[0].arguments["q"], json!("te"));
    }

    #[tokio::test]
    async fn fragments_assemble_into_one_call() {
        let mock = MockBackend::new().with_default(vec![MockResponse::tool_fragments(
            "search",
            [r#"{"q": "#, r#""ru"#, r#"st"}"#],
        )]);
        let (ctx, agent, p) = fixtures("a");
        let items: Vec<_> = mock
            .stream(&ctx, &[], &agent, &p)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        match items[0].as_ref().unwrap() {
            ProviderChunk::Done(r) => {
                assert_eq!(r.tool_calls.len(), 1);
                assert_eq!(r.tool_calls[0].name, "search");
                assert_eq!(r.tool_calls[0].arguments["q"], json!("rust"));
                assert!(r.tool_calls[0].diagnostic.is_none());
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_response() {
        let mock = MockBackend::new().with_default(vec![MockResponse::delayed(
            Duration::from_millis(50),
            MockResponse::text("after delay"),
        )]);
        let (ctx, agent, p) = fixtures("a");
        let start = tokio::time::Instant::now();
        let r = mock.call(&ctx, &[], &agent, &p).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(r.content.as_deref(), Some("after delay"));
    }

    #[tokio::test]
    async fn records_context_and_tools() {
        let mock = MockBackend::new().with_default(vec![MockResponse::text("ok")]);
        let (mut ctx, agent, p) = fixtures("a");
        ctx.add_user("hi", Vec::new());
        let tools = vec![ToolSchema {
            name: "lookup".into(),
            description: "d".into(),
            parameters: json!({"type": "object"}),
        }];
        mock.call(&ctx, &tools, &agent, &p).await.unwrap();
        let calls = mock.calls();
        let call = &calls[0];
        assert_eq!(call.agent, "a");
        assert_eq!(call.messages.len(), 1);
        assert_eq!(call.tools, vec!["lookup"]);
    }
}
