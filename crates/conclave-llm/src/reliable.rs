use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conclave_core::agent::Agent;
use conclave_core::context::Context;
use conclave_core::errors::ProviderError;
use conclave_core::provider::{ChunkStream, LlmResponse, ProviderBackend, ProviderConfig};
use conclave_core::tools::ToolSchema;
use rand::Rng;
use tracing::warn;

/// Retry behavior for [`ReliableBackend`].
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
        }
    }
}

/// Wraps a backend with retry on retryable provider errors.
///
/// - Exponential backoff with jitter, capped at `max_delay`
/// - Honors `retry_after` hints from rate limit responses
/// - A stream is retried only while being opened; once it has been handed
///   out, errors inside it pass through
pub struct ReliableBackend {
    inner: Arc<dyn ProviderBackend>,
    config: ReliableConfig,
    total_retries: AtomicU64,
}

impl ReliableBackend {
    pub fn new(inner: Arc<dyn ProviderBackend>, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: Arc<dyn ProviderBackend>) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay;
        }

        let exp_delay = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp_delay.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    /// Decide whether to retry `err` after `attempt`; sleeps before returning `true`.
    async fn backoff(&self, attempt: u32, err: &ProviderError) -> bool {
        if !err.is_retryable() || attempt >= self.config.max_retries {
            return false;
        }
        let delay = self.retry_delay(attempt, err.suggested_delay());
        self.total_retries.fetch_add(1, Ordering::Relaxed);
        warn!(
            provider = %err.provider,
            attempt = attempt + 1,
            max_retries = self.config.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying after error"
        );
        tokio::time::sleep(delay).await;
        true
    }
}

#[async_trait]
impl ProviderBackend for ReliableBackend {
    async fn call(
        &self,
        context: &Context,
        tools: &[ToolSchema],
        agent: &Agent,
        provider: &ProviderConfig,
    ) -> Result<LlmResponse, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.inner.call(context, tools, agent, provider).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if !self.backoff(attempt, &e).await {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn stream(
        &self,
        context: &Context,
        tools: &[ToolSchema],
        agent: &Agent,
        provider: &ProviderConfig,
    ) -> Result<ChunkStream, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.inner.stream(context, tools, agent, provider).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    if !self.backoff(attempt, &e).await {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
