//! Tool boundaries the router dispatches to.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DocType, Passage, SqlFailure, SqlRows};

/// Answers structured questions against the tabular sales store.
///
/// The tool owns natural-language → SQL translation. Every failure is
/// reported as a [`SqlFailure`] value, never as a transport error.
#[async_trait]
pub trait SqlTool: Send + Sync {
    fn name(&self) -> &str {
        "run_sql"
    }

    async fn run(&self, question: &str) -> std::result::Result<SqlRows, SqlFailure>;

    /// Human-readable description of the tables the tool can query.
    async fn describe(&self) -> Result<String>;
}

/// Semantic passage search over the document store.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &str {
        "retrieve"
    }

    /// Up to `k` passages ordered by descending relevance; possibly empty.
    async fn retrieve(&self, query: &str, k: usize, doc_type: Option<DocType>) -> Result<Vec<Passage>>;
}
