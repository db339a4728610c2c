//! Bounded retry with exponential backoff for transient model-API failures.
//!
//! Only errors where `DriveWiseError::is_transient` holds are retried
//! (connection errors, 429, 5xx, timeouts). Terminal errors such as content
//! policy rejections or a missing API key return immediately.

use async_trait::async_trait;
use drivewise_core::error::Result;
use drivewise_core::traits::provider::{EmbeddingProvider, GenerateParams, Provider};
use drivewise_core::types::{Message, ProviderResponse};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = no retry).
    pub max_retries: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        let spread = (delay.as_millis() as u64 / 4).max(1);
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..spread))
    }
}

/// Run `op` until it succeeds, fails terminally, or retries run out.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("🔄 {} succeeded after {} retr{}", label, attempt, if attempt == 1 { "y" } else { "ies" });
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = policy.jittered(attempt);
                tracing::warn!(
                    "⚠️ {} failed (attempt {}/{}): {}, retrying in {:?}",
                    label,
                    attempt + 1,
                    policy.max_retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Wraps a provider so every call goes through [`retry_transient`].
pub struct Retrying<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> Retrying<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<T: Provider> Provider for Retrying<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn chat(&self, messages: &[Message], params: &GenerateParams) -> Result<ProviderResponse> {
        let label = format!("{} chat", self.inner.name());
        retry_transient(&self.policy, &label, || self.inner.chat(messages, params)).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.inner.health_check().await
    }
}

#[async_trait]
impl<T: EmbeddingProvider> EmbeddingProvider for Retrying<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let label = format!("{} embed", self.inner.name());
        retry_transient(&self.policy, &label, || self.inner.embed(inputs)).await
    }
}
