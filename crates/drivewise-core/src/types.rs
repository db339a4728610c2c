//! Data types shared across DriveWise crates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message sent to the model API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: &str) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: &str) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: &str) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Token usage reported by the model API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Response from a chat completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

/// Document families stored in the vector store (`doc_type` metadata).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Contracts,
    UserManuals,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Contracts => "contracts",
            DocType::UserManuals => "user_manuals",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "contracts" | "contract" | "warranty" => Some(DocType::Contracts),
            "user_manuals" | "user_manual" | "manuals" | "manual" => Some(DocType::UserManuals),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result set from the SQL tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlRows {
    /// The query that produced these rows.
    pub query: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// True when rows were cut at the configured maximum.
    #[serde(default)]
    pub truncated: bool,
}

impl SqlRows {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render as a plain-text table with a header row.
    pub fn render_table(&self) -> String {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(render_cell).collect())
            .collect();

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &cells {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.chars().count());
                }
            }
        }

        let fmt_row = |values: &[String]| -> String {
            values
                .iter()
                .enumerate()
                .map(|(i, v)| format!("{:<width$}", v, width = widths.get(i).copied().unwrap_or(0)))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        let mut out = fmt_row(&self.columns);
        out.push('\n');
        out.push_str(
            &widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-"),
        );
        for row in &cells {
            out.push('\n');
            out.push_str(&fmt_row(row));
        }
        if self.truncated {
            out.push_str("\n[truncated]");
        }
        out
    }
}

fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".into(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Why the SQL tool produced no usable rows.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SqlFailure {
    #[error("invalid query `{query}`: {reason}")]
    InvalidQuery { query: String, reason: String },

    #[error("connection error: {reason}")]
    Connection { reason: String },

    #[error("query `{query}` returned no rows")]
    EmptyResult { query: String },
}

/// A passage returned by the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    /// Source document identifier (file path or title).
    pub source: String,
    /// Relevance in [0, 1]; higher is closer.
    pub score: f32,
}
