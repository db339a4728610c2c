//! # DriveWise Providers
//!
//! Model API implementations for DriveWise.
//!
//! Every supported endpoint speaks the OpenAI wire format, so a single
//! `OpenAiCompatibleProvider` covers chat completions and embeddings. Both are
//! wrapped in [`retry::Retrying`] so transient failures are retried with
//! backoff before they reach the router.

pub mod openai_compatible;
pub mod provider_registry;
pub mod retry;

use std::sync::Arc;

use drivewise_core::config::LlmConfig;
use drivewise_core::error::{DriveWiseError, Result};
use drivewise_core::traits::{EmbeddingProvider, Provider};

use openai_compatible::OpenAiCompatibleProvider;
use retry::{RetryPolicy, Retrying};

fn build(config: &LlmConfig) -> Result<OpenAiCompatibleProvider> {
    let provider_name = config.provider.as_str();
    match provider_name {
        // Custom endpoint: "custom:https://my-server.com/v1"
        other if other.starts_with("custom:") => OpenAiCompatibleProvider::custom(other, config),

        _ => {
            let registry = provider_registry::get_provider_config(provider_name)
                .ok_or_else(|| DriveWiseError::ProviderNotFound(provider_name.into()))?;
            OpenAiCompatibleProvider::from_registry(registry, config)
        }
    }
}

fn policy(config: &LlmConfig) -> RetryPolicy {
    RetryPolicy::new(config.max_retries, config.retry_base_ms)
}

/// Create the chat provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn Provider>> {
    let provider = build(config)?;
    tracing::debug!("🧠 Chat provider: {} ({})", config.provider, config.model);
    Ok(Arc::new(Retrying::new(provider, policy(config))))
}

/// Create the embedding provider used for vector search.
pub fn create_embedder(config: &LlmConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider = build(config)?;
    tracing::debug!("🧬 Embedding provider: {} ({})", config.provider, config.embedding_model);
    Ok(Arc::new(Retrying::new(provider, policy(config))))
}

/// List all available provider names.
pub fn available_providers() -> Vec<&'static str> {
    let mut names = provider_registry::all_provider_names();
    names.push("custom");
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider() {
        let config = LlmConfig {
            provider: "does-not-exist".into(),
            ..LlmConfig::default()
        };
        assert!(matches!(create_provider(&config), Err(DriveWiseError::ProviderNotFound(_))));
    }

    #[test]
    fn test_create_known_and_custom() {
        let config = LlmConfig::default();
        assert_eq!(create_provider(&config).unwrap().name(), "openai");

        let custom = LlmConfig {
            provider: "custom:http://localhost:9000/v1".into(),
            ..LlmConfig::default()
        };
        assert_eq!(create_embedder(&custom).unwrap().name(), "custom");
    }

    #[test]
    fn test_available_providers() {
        let names = available_providers();
        assert!(names.contains(&"openai"));
        assert!(names.contains(&"custom"));
    }
}
