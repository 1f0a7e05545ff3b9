use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::context::{Context, ToolCall};
use crate::errors::ProviderError;
use crate::tools::ToolSchema;

/// Connection details for one vendor account. Backends are cached per `name`.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub name: String,
    /// Vendor tag used to pick a backend constructor ("openai", "anthropic", ...).
    pub kind: String,
    pub api_key: SecretString,
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            api_key: SecretString::from(api_key.into()),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

/// Normalized completion: optional text plus any tool calls.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One item of a provider stream: text chunks, then exactly one `Done`.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderChunk {
    Text(String),
    Done(LlmResponse),
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ProviderChunk, ProviderError>> + Send>>;

/// Trait implemented by each vendor adapter.
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    async fn call(
        &self,
        context: &Context,
        tools: &[ToolSchema],
        agent: &Agent,
        provider: &ProviderConfig,
    ) -> Result<LlmResponse, ProviderError>;

    /// Defaults to one `call`: its content as a single chunk, then the response.
    async fn stream(
        &self,
        context: &Context,
        tools: &[ToolSchema],
        agent: &Agent,
        provider: &ProviderConfig,
    ) -> Result<ChunkStream, ProviderError> {
        let response = self.call(context, tools, agent, provider).await?;
        let mut chunks = Vec::with_capacity(2);
        if let Some(text) = response.content.as_ref().filter(|t| !t.is_empty()) {
            chunks.push(Ok(ProviderChunk::Text(text.clone())));
        }
        chunks.push(Ok(ProviderChunk::Done(response)));
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct Fixed(LlmResponse);

    #[async_trait]
    impl ProviderBackend for Fixed {
        async fn call(
            &self,
            _context: &Context,
            _tools: &[ToolSchema],
            _agent: &Agent,
            _provider: &ProviderConfig,
        ) -> Result<LlmResponse, ProviderError> {
            Ok(self.0.clone())
        }
    }

    fn fixtures() -> (Context, Agent, ProviderConfig) {
        (
            Context::new("sys"),
            Agent::new("a", "i", "m", "p"),
            ProviderConfig::new("p", "mock", "sk-test"),
        )
    }

    #[test]
    fn provider_config_basic() {
        let p = ProviderConfig::new("openai", "openai", "sk-test");
        assert_eq!(p.api_key(), "sk-test");
        assert!(p.base_url.is_none());
        assert!(!format!("{p:?}").contains("sk-test"));

        let local = ProviderConfig::new("local", "openai", "none")
            .with_base_url("http://localhost:11434/v1");
        assert_eq!(local.base_url.as_deref(), Some("http://localhost:11434/v1"));
    }

    #[tokio::test]
    async fn default_stream_emits_content_then_response() {
        let (ctx, agent, provider) = fixtures();
        let backend = Fixed(LlmResponse::text("hello"));
        let chunks: Vec<_> = backend
            .stream(&ctx, &[], &agent, &provider)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().unwrap(), &ProviderChunk::Text("hello".into()));
        assert!(matches!(chunks[1], Ok(ProviderChunk::Done(_))));
    }

    #[tokio::test]
    async fn default_stream_skips_empty_content() {
        let (ctx, agent, provider) = fixtures();
        let call = ToolCall::new("t1", "lookup", Default::default());
        let backend = Fixed(LlmResponse::tool_calls(vec![call]));
        let chunks: Vec<_> = backend
            .stream(&ctx, &[], &agent, &provider)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            Ok(ProviderChunk::Done(r)) => assert!(r.has_tool_calls()),
            other => panic!("unexpected chunk {other:?}"),
        }
    }
}
