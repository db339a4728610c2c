//! Unified OpenAI-compatible provider.
//!
//! A single struct that handles chat completions and embeddings for every
//! OpenAI-compatible API. Providers are distinguished only by endpoint URL,
//! auth style and API key.

use async_trait::async_trait;
use drivewise_core::config::LlmConfig;
use drivewise_core::error::{DriveWiseError, Result};
use drivewise_core::traits::provider::{EmbeddingProvider, GenerateParams, Provider};
use drivewise_core::types::{Message, ProviderResponse, Usage};
use serde_json::{Value, json};
use std::time::Duration;

use crate::provider_registry::{AuthStyle, ProviderConfig};

/// A unified provider that works with any OpenAI-compatible API.
pub struct OpenAiCompatibleProvider {
    /// Provider name (e.g., "openai", "groq", "ollama").
    name: String,
    /// API key for authentication.
    api_key: String,
    /// Base URL for the API (e.g., "https://api.openai.com/v1").
    base_url: String,
    /// Path for chat completions (e.g., "/chat/completions").
    chat_path: String,
    /// Path for embeddings, when the provider has one.
    embeddings_path: Option<String>,
    /// Authentication style.
    auth_style: AuthStyle,
    /// Model used by `embed`.
    embedding_model: String,
    /// HTTP client (request timeout from config).
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    /// Create from a known provider config + LLM config.
    ///
    /// Resolution order:
    /// - API key: `llm.api_key` > env vars > empty
    /// - Base URL: `llm.endpoint` > env override > registry default
    pub fn from_registry(registry: &ProviderConfig, config: &LlmConfig) -> Result<Self> {
        let api_key = if !config.api_key.is_empty() {
            config.api_key.clone()
        } else {
            registry
                .env_keys
                .iter()
                .find_map(|key| std::env::var(key).ok())
                .unwrap_or_default()
        };

        let base_url = if !config.endpoint.is_empty() {
            config.endpoint.trim_end_matches('/').to_string()
        } else {
            registry
                .base_url_env
                .and_then(|env_key| {
                    let val = std::env::var(env_key).ok()?;
                    // OLLAMA_HOST and friends usually omit the /v1 suffix
                    if val.ends_with("/v1") {
                        Some(val)
                    } else {
                        Some(format!("{}/v1", val.trim_end_matches('/')))
                    }
                })
                .unwrap_or_else(|| registry.base_url.to_string())
        };

        Ok(Self {
            name: registry.name.to_string(),
            api_key,
            base_url,
            chat_path: registry.chat_path.to_string(),
            embeddings_path: registry.embeddings_path.map(String::from),
            auth_style: registry.auth_style,
            embedding_model: config.embedding_model.clone(),
            client: build_client(config.timeout_secs)?,
        })
    }

    /// Create for a custom endpoint (e.g., "custom:https://my-server.com/v1").
    pub fn custom(endpoint: &str, config: &LlmConfig) -> Result<Self> {
        let base_url = endpoint
            .strip_prefix("custom:")
            .unwrap_or(endpoint)
            .trim_end_matches('/')
            .to_string();

        let api_key = if !config.api_key.is_empty() {
            config.api_key.clone()
        } else {
            std::env::var("CUSTOM_API_KEY").unwrap_or_default()
        };

        let auth_style = if api_key.is_empty() {
            AuthStyle::None
        } else {
            AuthStyle::Bearer
        };

        Ok(Self {
            name: "custom".to_string(),
            api_key,
            base_url,
            chat_path: "/chat/completions".to_string(),
            embeddings_path: Some("/embeddings".to_string()),
            auth_style,
            embedding_model: config.embedding_model.clone(),
            client: build_client(config.timeout_secs)?,
        })
    }

    /// Build the auth header for the request.
    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_style {
            AuthStyle::Bearer if !self.api_key.is_empty() => {
                req.header("Authorization", format!("Bearer {}", self.api_key))
            }
            _ => req,
        }
    }

    fn require_key(&self) -> Result<()> {
        if self.auth_style != AuthStyle::None && self.api_key.is_empty() {
            return Err(DriveWiseError::ApiKeyMissing(self.name.clone()));
        }
        Ok(())
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body);
        let req = self.apply_auth(req);

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                DriveWiseError::Timeout(format!("{} ({})", self.name, url))
            } else {
                DriveWiseError::Http(format!("{} connection failed ({}): {}", self.name, url, e))
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(&self.name, status.as_u16(), &text));
        }

        resp.json()
            .await
            .map_err(|e| DriveWiseError::Provider(format!("{} returned invalid JSON: {}", self.name, e)))
    }
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| DriveWiseError::Http(format!("HTTP client: {e}")))
}

/// Map a non-success HTTP status to an error, separating transient failures
/// (429, 5xx) from terminal ones.
pub(crate) fn status_error(provider: &str, status: u16, body: &str) -> DriveWiseError {
    match status {
        429 => DriveWiseError::RateLimited(provider.to_string()),
        400 if body.contains("content_policy") || body.contains("content_filter") => {
            DriveWiseError::ContentPolicy(format!("{provider}: {}", truncate(body, 200)))
        }
        408 | 504 => DriveWiseError::Timeout(format!("{provider} gateway timeout")),
        500..=599 => DriveWiseError::Http(format!("{provider} API error {status}: {}", truncate(body, 200))),
        _ => DriveWiseError::Provider(format!("{provider} API error {status}: {}", truncate(body, 200))),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Parse a standard OpenAI chat completion body.
pub(crate) fn parse_chat_response(provider: &str, json: &Value) -> Result<ProviderResponse> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| DriveWiseError::Provider(format!("{provider}: no choices in response")))?;

    let content = choice["message"]["content"].as_str().map(String::from);
    let finish_reason = choice["finish_reason"].as_str().map(String::from);

    if content.is_none() && finish_reason.as_deref() == Some("content_filter") {
        return Err(DriveWiseError::ContentPolicy(format!("{provider}: completion filtered")));
    }

    let usage = json["usage"].as_object().map(|u| Usage {
        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        completion_tokens: u
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
    });

    Ok(ProviderResponse {
        content,
        finish_reason,
        usage,
    })
}

/// Parse an OpenAI embeddings body, ordering vectors by their `index`.
pub(crate) fn parse_embeddings(provider: &str, json: &Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json["data"]
        .as_array()
        .ok_or_else(|| DriveWiseError::Provider(format!("{provider}: no data in embeddings response")))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = data
        .iter()
        .enumerate()
        .map(|(pos, item)| {
            let index = item["index"].as_u64().map(|i| i as usize).unwrap_or(pos);
            let vector = item["embedding"]
                .as_array()
                .map(|arr| arr.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
                .unwrap_or_default();
            (index, vector)
        })
        .collect();
    indexed.sort_by_key(|(i, _)| *i);

    if indexed.len() != expected || indexed.iter().any(|(_, v)| v.is_empty()) {
        return Err(DriveWiseError::Provider(format!(
            "{provider}: expected {expected} embeddings, got {}",
            indexed.len()
        )));
    }
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, messages: &[Message], params: &GenerateParams) -> Result<ProviderResponse> {
        self.require_key()?;

        let mut body = json!({
            "model": params.model,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "messages": serde_json::to_value(messages)?,
        });
        if !params.stop.is_empty() {
            body["stop"] = json!(params.stop);
        }

        let json = self.post_json(&self.chat_path, &body).await?;
        let response = parse_chat_response(&self.name, &json)?;
        if let Some(usage) = &response.usage {
            tracing::debug!(
                "🧮 {} usage: {} prompt + {} completion tokens",
                self.name,
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }
        Ok(response)
    }

    async fn health_check(&self) -> Result<bool> {
        if self.auth_style != AuthStyle::None {
            // For cloud providers, just check if API key is set
            return Ok(!self.api_key.is_empty());
        }

        // For local servers (ollama, vllm), try to connect
        let url = format!("{}/models", self.base_url);
        let resp = self.client.get(&url).send().await;
        Ok(resp.is_ok())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(vec![]);
        }
        self.require_key()?;

        let path = self.embeddings_path.as_deref().ok_or_else(|| {
            DriveWiseError::Provider(format!("{} has no embeddings endpoint", self.name))
        })?;

        let body = json!({
            "model": self.embedding_model,
            "input": inputs,
        });
        let json = self.post_json(path, &body).await?;
        parse_embeddings(&self.name, &json, inputs.len())
    }
}
