//! Document retrieval over a Chroma vector store.
//!
//! The question is embedded with the configured embedding model, then the
//! collection is queried over Chroma's REST API. Distances are converted to a
//! relevance in [0, 1], low-relevance and duplicate passages are dropped.

use async_trait::async_trait;
use drivewise_core::config::RetrievalConfig;
use drivewise_core::error::{DriveWiseError, Result};
use drivewise_core::traits::{EmbeddingProvider, Retriever};
use drivewise_core::types::{DocType, Passage};
use drivewise_providers::retry::{RetryPolicy, retry_transient};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Chroma REST API generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaApi {
    V1,
    V2,
}

/// Distance function the collection was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceKind {
    /// Squared L2 over unit vectors, range [0, 4].
    L2,
    Cosine,
    InnerProduct,
}

impl DistanceKind {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "cosine" => DistanceKind::Cosine,
            "ip" | "inner_product" => DistanceKind::InnerProduct,
            _ => DistanceKind::L2,
        }
    }

    /// Map a raw distance to a relevance in [0, 1].
    pub fn relevance(&self, distance: f32) -> f32 {
        let score = match self {
            // Unit-normalized embeddings: squared L2 = 2 - 2cos
            DistanceKind::L2 => 1.0 - distance / 2.0,
            DistanceKind::Cosine | DistanceKind::InnerProduct => 1.0 - distance,
        };
        if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) }
    }
}

/// Parse a Chroma `query` response for a single query embedding.
pub fn parse_query_response(json: &Value, distance: DistanceKind) -> Vec<Passage> {
    let documents = json["documents"][0].as_array().cloned().unwrap_or_default();
    let metadatas = json["metadatas"][0].as_array().cloned().unwrap_or_default();
    let distances = json["distances"][0].as_array().cloned().unwrap_or_default();

    documents
        .iter()
        .enumerate()
        .filter_map(|(i, doc)| {
            let text = doc.as_str()?.to_string();
            let source = metadatas
                .get(i)
                .and_then(|m| m["source"].as_str())
                .unwrap_or("Unknown")
                .to_string();
            let raw = distances.get(i).and_then(|d| d.as_f64()).unwrap_or(f64::MAX) as f32;
            Some(Passage {
                text,
                source,
                score: distance.relevance(raw),
            })
        })
        .collect()
}

/// Drop passages under `min_relevance` and repeated texts, keep the best `k`
/// ordered by descending relevance.
pub fn finalize_passages(passages: Vec<Passage>, min_relevance: f32, k: usize) -> Vec<Passage> {
    let mut seen = HashSet::new();
    let mut kept: Vec<Passage> = passages
        .into_iter()
        .filter(|p| p.score >= min_relevance && !p.text.trim().is_empty())
        .filter(|p| seen.insert(p.text.trim().to_string()))
        .collect();
    kept.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    kept.truncate(k);
    kept
}

/// Retriever backed by a Chroma server.
pub struct ChromaRetriever {
    client: reqwest::Client,
    base_url: String,
    api: ChromaApi,
    tenant: String,
    database: String,
    collection: String,
    collection_id: OnceCell<String>,
    distance: DistanceKind,
    min_relevance: f32,
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
}

impl ChromaRetriever {
    pub fn new(config: &RetrievalConfig, embedder: Arc<dyn EmbeddingProvider>, retry: RetryPolicy) -> Result<Self> {
        let api = match config.chroma_api.trim().to_lowercase().as_str() {
            "v1" => ChromaApi::V1,
            "v2" => ChromaApi::V2,
            other => {
                return Err(DriveWiseError::Config(format!(
                    "retrieval.chroma_api must be \"v1\" or \"v2\", got \"{other}\""
                )));
            }
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| DriveWiseError::Http(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.chroma_url.trim_end_matches('/').to_string(),
            api,
            tenant: config.tenant.clone(),
            database: config.database.clone(),
            collection: config.collection.clone(),
            collection_id: OnceCell::new(),
            distance: DistanceKind::parse(&config.distance),
            min_relevance: config.min_relevance,
            embedder,
            retry,
        })
    }

    fn collections_url(&self) -> String {
        match self.api {
            ChromaApi::V1 => format!("{}/api/v1/collections", self.base_url),
            ChromaApi::V2 => format!(
                "{}/api/v2/tenants/{}/databases/{}/collections",
                self.base_url, self.tenant, self.database
            ),
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                DriveWiseError::Timeout(format!("chroma {what}"))
            } else {
                DriveWiseError::Http(format!("chroma {what} failed: {e}"))
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => DriveWiseError::RateLimited("chroma".into()),
                500..=599 => DriveWiseError::Http(format!("chroma {what} error {status}: {text}")),
                _ => DriveWiseError::Retrieval(format!("chroma {what} error {status}: {text}")),
            });
        }
        resp.json()
            .await
            .map_err(|e| DriveWiseError::Retrieval(format!("chroma {what} returned invalid JSON: {e}")))
    }

    /// Resolve the collection name to its id (cached after the first lookup).
    async fn collection_id(&self) -> Result<&str> {
        self.collection_id
            .get_or_try_init(|| async {
                let url = format!("{}/{}", self.collections_url(), self.collection);
                let json = retry_transient(&self.retry, "chroma collection lookup", || {
                    self.send(self.client.get(&url), "collection lookup")
                })
                .await?;
                json["id"]
                    .as_str()
                    .map(String::from)
                    .ok_or_else(|| DriveWiseError::Retrieval(format!("collection '{}' has no id", self.collection)))
            })
            .await
            .map(String::as_str)
    }
}

#[async_trait]
impl Retriever for ChromaRetriever {
    async fn retrieve(&self, query: &str, k: usize, doc_type: Option<DocType>) -> Result<Vec<Passage>> {
        if k == 0 {
            return Ok(vec![]);
        }

        let embedding = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DriveWiseError::Retrieval("empty embedding response".into()))?;

        let id = self.collection_id().await?;
        let url = format!("{}/{}/query", self.collections_url(), id);

        let mut body = json!({
            "query_embeddings": [embedding],
            "n_results": k,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(doc_type) = doc_type {
            body["where"] = json!({ "doc_type": doc_type.as_str() });
        }

        let json = retry_transient(&self.retry, "chroma query", || {
            self.send(self.client.post(&url).json(&body), "query")
        })
        .await?;

        let raw = parse_query_response(&json, self.distance);
        let found = raw.len();
        let passages = finalize_passages(raw, self.min_relevance, k);
        tracing::info!(
            "📚 Retrieved {} passage(s) ({} above relevance {:.2}){}",
            found,
            passages.len(),
            self.min_relevance,
            doc_type.map(|d| format!(" from {d}")).unwrap_or_default()
        );
        Ok(passages)
    }
}
