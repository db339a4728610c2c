//! API route handlers for the gateway.

use axum::{Json, extract::State};
use serde::Deserialize;
use std::sync::Arc;

use super::server::AppState;

/// Body of `POST /api/v1/chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "drivewise-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "classifier": state.router.classifier_name(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Answer a question. Always 200: degraded and failed requests still carry
/// a readable `answer`.
pub async fn chat(State(state): State<Arc<AppState>>, Json(req): Json<ChatRequest>) -> Json<serde_json::Value> {
    let answer = state.router.route(&req.question).await;
    let details = answer.tool_details();

    let mut body = serde_json::json!({
        "ok": true,
        "request_id": answer.request_id,
        "answer": answer.text,
        "route": answer.route,
        "state": answer.state,
        "sources": answer.sources,
        "failures": answer.failures,
    });
    // `tools` is omitted when no tool ran
    if let Some(details) = details {
        body["tools"] = serde_json::json!(details);
    }
    Json(body)
}

/// Describe the sales tables the SQL tool can query.
pub async fn schema(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.router.describe_sql().await {
        Ok(schema) => Json(serde_json::json!({ "ok": true, "schema": schema })),
        Err(e) => {
            tracing::warn!("⚠️ Schema unavailable: {e}");
            Json(serde_json::json!({ "ok": false, "error": e.to_string() }))
        }
    }
}
