//! DriveWise configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DriveWiseError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriveWiseConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sql: SqlConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl DriveWiseConfig {
    /// Load config from the default path (~/.drivewise/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DriveWiseError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DriveWiseError::Config(format!("Failed to parse config: {e}")))?;
        tracing::debug!("📄 Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| DriveWiseError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Apply environment overrides on top of file values.
    ///
    /// `OPENAI_API_KEY`, `DRIVEWISE_SQL_PATH`, `DRIVEWISE_SQL_ENGINE`,
    /// `CHROMA_URL` and `CHROMA_COLLECTION` win over the file when set and
    /// non-empty.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.llm.api_key.is_empty()
            && let Some(key) = get("OPENAI_API_KEY")
        {
            self.llm.api_key = key;
        }
        if let Some(path) = get("DRIVEWISE_SQL_PATH") {
            self.sql.path = path;
        }
        if let Some(engine) = get("DRIVEWISE_SQL_ENGINE") {
            self.sql.engine = engine.trim().to_lowercase();
        }
        if let Some(url) = get("CHROMA_URL") {
            self.retrieval.chroma_url = url;
        }
        if let Some(collection) = get("CHROMA_COLLECTION") {
            self.retrieval.collection = collection;
        }
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the DriveWise home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".drivewise")
    }
}

/// Hosted model API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    /// Overrides the registry base URL when non-empty.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

fn default_provider() -> String { "openai".into() }
fn default_model() -> String { "gpt-4o-mini".into() }
fn default_temperature() -> f32 { 0.1 }
fn default_max_tokens() -> u32 { 1000 }
fn default_llm_timeout() -> u64 { 30 }
fn default_embedding_model() -> String { "text-embedding-ada-002".into() }
fn default_max_retries() -> u32 { 2 }
fn default_retry_base_ms() -> u64 { 500 }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: String::new(),
            endpoint: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            embedding_model: default_embedding_model(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

/// Tabular sales store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlConfig {
    /// Storage engine of the sales database: "sqlite" or "duckdb".
    #[serde(default = "default_sql_engine")]
    pub engine: String,
    #[serde(default = "default_sql_path")]
    pub path: String,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default = "default_sql_timeout")]
    pub timeout_secs: u64,
    /// Sampling temperature for query generation.
    #[serde(default)]
    pub temperature: f32,
}

fn default_sql_engine() -> String { "sqlite".into() }
fn default_sql_path() -> String { "~/.drivewise/db/sales.db".into() }
fn default_max_rows() -> usize { 200 }
fn default_sql_timeout() -> u64 { 20 }

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            engine: default_sql_engine(),
            path: default_sql_path(),
            max_rows: default_max_rows(),
            timeout_secs: default_sql_timeout(),
            temperature: 0.0,
        }
    }
}

impl SqlConfig {
    /// Database path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

/// Vector store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_chroma_url")]
    pub chroma_url: String,
    /// Chroma REST API generation: "v2" (Chroma 1.x) or "v1" (0.4/0.5 servers).
    #[serde(default = "default_chroma_api")]
    pub chroma_api: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Collection distance function: "l2" (Chroma default), "cosine" or "ip".
    #[serde(default = "default_distance")]
    pub distance: String,
    /// Passages scoring below this are discarded.
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_secs: u64,
}

fn default_chroma_url() -> String { "http://localhost:8000".into() }
fn default_chroma_api() -> String { "v2".into() }
fn default_tenant() -> String { "default_tenant".into() }
fn default_database() -> String { "default_database".into() }
fn default_collection() -> String { "langchain".into() }
fn default_distance() -> String { "l2".into() }
fn default_top_k() -> usize { 4 }
fn default_min_relevance() -> f32 { 0.2 }
fn default_retrieval_timeout() -> u64 { 15 }

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chroma_url: default_chroma_url(),
            chroma_api: default_chroma_api(),
            tenant: default_tenant(),
            database: default_database(),
            collection: default_collection(),
            distance: default_distance(),
            top_k: default_top_k(),
            min_relevance: default_min_relevance(),
            timeout_secs: default_retrieval_timeout(),
        }
    }
}

/// Routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// "rules" (deterministic keyword scoring) or "model" (LLM with rules fallback).
    #[serde(default = "default_classifier")]
    pub classifier: String,
}

fn default_classifier() -> String { "rules".into() }

impl Default for RouterConfig {
    fn default() -> Self {
        Self { classifier: default_classifier() }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 { 3000 }
fn default_host() -> String { "127.0.0.1".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}
