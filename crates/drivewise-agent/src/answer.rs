//! Answer type, request lifecycle and failure taxonomy.

use drivewise_core::types::{DocType, Passage, SqlFailure, SqlRows};
use serde::Serialize;
use serde_json::{Value, json};

use crate::classifier::Route;

/// Lifecycle of one routed request.
///
/// `Received → Classified → Querying* → Composing → Done`, or `Failed` when
/// classification finds no tool or every queried branch comes back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Received,
    Classified,
    QueryingSql,
    QueryingRetrieval,
    QueryingBoth,
    Composing,
    Done,
    Failed,
}

impl RequestState {
    pub fn querying(route: Route) -> Self {
        match route {
            Route::Sql => RequestState::QueryingSql,
            Route::Retrieval => RequestState::QueryingRetrieval,
            Route::Both => RequestState::QueryingBoth,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Done | RequestState::Failed)
    }
}

/// Ordered record of the states a request went through.
#[derive(Debug, Clone)]
pub(crate) struct RequestTrace {
    request_id: String,
    states: Vec<RequestState>,
}

impl RequestTrace {
    pub(crate) fn new(request_id: &str) -> Self {
        tracing::debug!("[{}] state → RECEIVED", request_id);
        Self {
            request_id: request_id.to_string(),
            states: vec![RequestState::Received],
        }
    }

    pub(crate) fn advance(&mut self, next: RequestState) {
        if self.current().is_terminal() {
            return;
        }
        tracing::debug!("[{}] state → {:?}", self.request_id, next);
        self.states.push(next);
    }

    pub(crate) fn current(&self) -> RequestState {
        self.states.last().copied().unwrap_or(RequestState::Received)
    }

    pub(crate) fn into_states(self) -> Vec<RequestState> {
        self.states
    }
}

/// Why (part of) a request degraded.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteFailure {
    #[error("no tool matches the question")]
    ClassificationAmbiguous,

    #[error("SQL branch failed: {failure}")]
    SqlExecutionFailed { failure: SqlFailure },

    #[error("no relevant passages{}", reason_suffix(.reason))]
    RetrievalEmpty { reason: Option<String> },

    #[error("model API failed: {reason}")]
    ModelApiFailed { reason: String },

    #[error("both SQL and retrieval came back without evidence")]
    BothBranchesFailed,
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_ref().map(|r| format!(" ({r})")).unwrap_or_default()
}

/// What a tool call produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ToolOutput {
    Rows(SqlRows),
    Passages(Vec<Passage>),
    Failed(String),
}

/// One executed tool call, with the arguments it was given.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub name: String,
    pub args: Value,
    pub output: ToolOutput,
}

impl ToolCall {
    pub(crate) fn sql(name: &str, question: &str, output: ToolOutput) -> Self {
        Self {
            name: name.to_string(),
            args: json!({ "question": question }),
            output,
        }
    }

    pub(crate) fn retrieval(name: &str, question: &str, k: usize, doc_type: Option<DocType>, output: ToolOutput) -> Self {
        let mut args = json!({ "question": question, "k": k });
        if let Some(doc_type) = doc_type {
            args["doc_type"] = json!(doc_type.as_str());
        }
        Self {
            name: name.to_string(),
            args,
            output,
        }
    }
}

/// The response to one question. Always carries readable text, even when
/// every tool failed.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub request_id: String,
    pub question: String,
    pub text: String,
    pub route: Option<Route>,
    pub state: RequestState,
    pub states: Vec<RequestState>,
    pub tool_calls: Vec<ToolCall>,
    pub failures: Vec<RouteFailure>,
    /// Distinct sources of the passages the answer was built from.
    pub sources: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Answer {
    pub fn is_fallback(&self) -> bool {
        self.state == RequestState::Failed
    }

    pub fn sql_rows(&self) -> Option<&SqlRows> {
        self.tool_calls.iter().find_map(|c| match &c.output {
            ToolOutput::Rows(rows) => Some(rows),
            _ => None,
        })
    }

    pub fn passages(&self) -> &[Passage] {
        self.tool_calls
            .iter()
            .find_map(|c| match &c.output {
                ToolOutput::Passages(p) => Some(p.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Human-readable dump of the tool calls, `None` when no tool ran.
    pub fn tool_details(&self) -> Option<String> {
        if self.tool_calls.is_empty() {
            return None;
        }

        let mut out = String::from("Tool calls:");
        for (i, call) in self.tool_calls.iter().enumerate() {
            out.push_str(&format!("\n\n{}. {}\n   Arguments: {}\n", i + 1, call.name, call.args));
            match &call.output {
                ToolOutput::Rows(rows) => {
                    out.push_str(&format!("   Query: {}\n   Result:\n", rows.query));
                    for line in rows.render_table().lines() {
                        out.push_str("      ");
                        out.push_str(line);
                        out.push('\n');
                    }
                }
                ToolOutput::Passages(passages) if passages.is_empty() => {
                    out.push_str("   Result: no relevant passages\n");
                }
                ToolOutput::Passages(passages) => {
                    out.push_str(&format!("   Result: {} passage(s)\n", passages.len()));
                    for p in passages {
                        out.push_str(&format!(
                            "      - [{:.2}] {}: {}\n",
                            p.score,
                            p.source,
                            excerpt(&p.text, 160)
                        ));
                    }
                }
                ToolOutput::Failed(reason) => out.push_str(&format!("   Failed: {reason}\n")),
            }
        }
        Some(out.trim_end().to_string())
    }
}

/// First `max` characters of `text` on one line.
pub(crate) fn excerpt(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{}...", cut.trim_end())
    }
}
