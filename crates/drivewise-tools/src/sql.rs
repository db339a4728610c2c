//! Natural-language → SQL tool over the sales database.
//!
//! ```text
//! question ──► schema + rules prompt ──► model ──► clean + guard ──► SalesDb
//!                                                      │               │
//!                                               InvalidQuery     rows | EmptyResult
//! ```

use async_trait::async_trait;
use drivewise_core::error::{DriveWiseError, Result};
use drivewise_core::traits::{GenerateParams, Provider, SqlTool};
use drivewise_core::types::{Message, SqlFailure, SqlRows};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::sales_db::{SalesConnection, SalesDb};

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```(?:sqlite|duckdb|sql)?\s*(.*?)```").unwrap());

static STRING_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"'(?:[^']|'')*'").unwrap());

static FORBIDDEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(insert|update|delete|drop|alter|create|attach|detach|pragma|vacuum|reindex|copy|export|import|install|load)\b")
        .unwrap()
});

/// Build the query-generation prompt.
pub fn build_sql_prompt(dialect: &str, schema: &str, question: &str) -> String {
    format!(
        "You are a SQL expert. Given the following {dialect} database schema, write a SQL query to answer the user's question.

Follow these rules:
1. Return only SQL: no explanations, comments, or natural-language text.
2. Use only the tables and columns provided in the schema.
3. Do not invent fields, tables, or values.
4. Prefer simple, readable SQL.
5. If the question is ambiguous, choose the safest reasonable interpretation based strictly on the schema.
6. Never modify the database; generate only SELECT queries.
7. When filters involve text, use case-insensitive matching when appropriate.
8. If the user asks for something impossible with the available schema, generate the closest valid SQL query.

Schema:
{schema}

Question: {question}

Return ONLY the SQL query. Do not include markdown formatting or explanations."
    )
}

/// Strip markdown fences, a leading `sql` tag and trailing semicolons.
pub fn clean_sql(raw: &str) -> String {
    let body = FENCE_RE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);

    let mut sql = body.trim();
    if let Some(rest) = sql.strip_prefix("sql\n").or_else(|| sql.strip_prefix("SQL\n")) {
        sql = rest.trim();
    }
    sql.trim_end_matches(|c: char| c == ';' || c.is_whitespace()).to_string()
}

/// Accept exactly one `SELECT`/`WITH` statement with no write keywords
/// outside string literals.
pub fn guard_read_only(sql: &str) -> std::result::Result<(), String> {
    if sql.is_empty() {
        return Err("model returned an empty query".into());
    }

    let without_literals = STRING_LITERAL_RE.replace_all(sql, "''");
    if without_literals.contains(';') {
        return Err("multiple statements are not allowed".into());
    }

    let first = without_literals
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_lowercase();
    if first != "select" && first != "with" {
        return Err(format!("only SELECT queries are allowed (got `{first}`)"));
    }

    if let Some(m) = FORBIDDEN_RE.find(&without_literals) {
        return Err(format!("`{}` is not allowed in a read-only query", m.as_str()));
    }
    Ok(())
}

/// SQL tool that asks the model to write the query and runs it on [`SalesDb`].
pub struct ModelSqlTool {
    db: SalesDb,
    provider: Arc<dyn Provider>,
    params: GenerateParams,
    max_rows: usize,
    timeout: Duration,
    schema: OnceCell<String>,
}

impl ModelSqlTool {
    pub fn new(db: SalesDb, provider: Arc<dyn Provider>, params: GenerateParams) -> Self {
        Self {
            db,
            provider,
            params,
            max_rows: 200,
            timeout: Duration::from_secs(20),
            schema: OnceCell::new(),
        }
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.max(1);
        self
    }

    /// Bound on each database task (schema load, statement execution). The
    /// task's own connection is interrupted on expiry.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Schema description, computed once per tool (the store is read-only).
    async fn schema(&self) -> Result<&str> {
        self.schema
            .get_or_try_init(|| async {
                self.on_connection("schema load", |conn| conn.describe_schema())
                    .await
                    .map_err(DriveWiseError::Database)?
            })
            .await
            .map(String::as_str)
    }

    /// Run `work` on a fresh connection in the blocking pool, bounded by the
    /// tool timeout. On expiry only that connection's statement is interrupted.
    async fn on_connection<T, F>(&self, what: &str, work: F) -> std::result::Result<T, String>
    where
        F: FnOnce(&SalesConnection) -> T + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.db.connect().map_err(|e| e.to_string())?;
        let cancel = conn.canceller();
        let task = tokio::task::spawn_blocking(move || work(&conn));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(join)) => Err(format!("{what} task failed: {join}")),
            Err(_) => {
                cancel.cancel();
                Err(format!("{what} timed out after {:?}", self.timeout))
            }
        }
    }

    /// Ask the model for a query and clean it up.
    pub async fn generate_sql(&self, question: &str) -> Result<String> {
        let schema = self.schema().await?;
        let prompt = build_sql_prompt(self.db.engine().dialect(), schema, question);
        let response = self.provider.chat(&[Message::user(&prompt)], &self.params).await?;
        let raw = response.content.unwrap_or_default();
        Ok(clean_sql(&raw))
    }

    async fn execute(&self, sql: String) -> std::result::Result<SqlRows, SqlFailure> {
        let max_rows = self.max_rows;
        self.on_connection("query", move |conn| conn.query(&sql, max_rows))
            .await
            .unwrap_or_else(|reason| Err(SqlFailure::Connection { reason }))
    }
}

#[async_trait]
impl SqlTool for ModelSqlTool {
    async fn run(&self, question: &str) -> std::result::Result<SqlRows, SqlFailure> {
        let sql = self.generate_sql(question).await.map_err(|e| SqlFailure::Connection {
            reason: format!("query generation failed: {e}"),
        })?;
        tracing::info!("🧾 Generated SQL: {}", sql);

        guard_read_only(&sql).map_err(|reason| SqlFailure::InvalidQuery {
            query: sql.clone(),
            reason,
        })?;

        let result = self.execute(sql).await;
        match &result {
            Ok(rows) => tracing::debug!("🧾 SQL returned {} row(s)", rows.rows.len()),
            Err(e) => tracing::warn!("⚠️ SQL branch failed: {}", e),
        }
        result
    }

    async fn describe(&self) -> Result<String> {
        self.schema().await.map(String::from)
    }
}

/// Stands in for the SQL tool when the database could not be opened, so the
/// router still answers (degraded) instead of refusing to start.
pub struct UnavailableSqlTool {
    reason: String,
}

impl UnavailableSqlTool {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl SqlTool for UnavailableSqlTool {
    async fn run(&self, _question: &str) -> std::result::Result<SqlRows, SqlFailure> {
        Err(SqlFailure::Connection { reason: self.reason.clone() })
    }

    async fn describe(&self) -> Result<String> {
        Err(DriveWiseError::Database(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivewise_core::types::ProviderResponse;
    use crate::sales_db::tests::{STAR_SCHEMA, fixture};
    use crate::sales_db::Engine;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Returns a fixed completion and records the prompts it saw.
    struct CannedModel {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedModel {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self { reply: reply.into(), prompts: Mutex::new(vec![]) })
        }
    }

    #[async_trait]
    impl Provider for CannedModel {
        fn name(&self) -> &str {
            "canned"
        }

        async fn chat(&self, messages: &[Message], _: &GenerateParams) -> Result<ProviderResponse> {
            self.prompts.lock().unwrap().push(messages[0].content.clone());
            Ok(ProviderResponse { content: Some(self.reply.clone()), ..Default::default() })
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    /// Counts forever; only an interrupt ends it.
    const ENDLESS_QUERY: &str =
        "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT COUNT(*) FROM c";

    fn tool(reply: &str) -> (ModelSqlTool, Arc<CannedModel>, TempDir) {
        let (db, dir) = fixture();
        let model = CannedModel::new(reply);
        let tool = ModelSqlTool::new(db, model.clone(), GenerateParams::default());
        (tool, model, dir)
    }

    #[test]
    fn test_clean_sql_strips_fences() {
        assert_eq!(clean_sql("```sql\nSELECT 1;\n```"), "SELECT 1");
        assert_eq!(clean_sql("  SELECT * FROM t ;; "), "SELECT * FROM t");
        assert_eq!(clean_sql("sql\nSELECT 2"), "SELECT 2");
        assert_eq!(clean_sql("Here you go:\n```\nSELECT 3\n```"), "SELECT 3");
    }

    #[test]
    fn test_guard_read_only() {
        assert!(guard_read_only("SELECT * FROM FACT_SALES").is_ok());
        assert!(guard_read_only("with t as (select 1) select * from t").is_ok());
        // Keywords inside literals are data, not statements
        assert!(guard_read_only("SELECT * FROM notes WHERE body = 'please delete me; thanks'").is_ok());

        assert!(guard_read_only("").is_err());
        assert!(guard_read_only("DROP TABLE FACT_SALES").is_err());
        assert!(guard_read_only("SELECT 1; DELETE FROM FACT_SALES").is_err());
        assert!(guard_read_only("WITH x AS (SELECT 1) DELETE FROM FACT_SALES").is_err());
        assert!(guard_read_only("Sorry, I cannot answer that.").is_err());
    }

    #[test]
    fn test_prompt_contains_schema_and_question() {
        let prompt = build_sql_prompt("DuckDB", "Table: FACT_SALES", "How many?");
        assert!(prompt.contains("the following DuckDB database schema"));
        assert!(prompt.contains("Schema:\nTable: FACT_SALES"));
        assert!(prompt.contains("Question: How many?"));
        assert!(prompt.contains("Never modify the database"));
    }

    #[tokio::test]
    async fn test_run_returns_rows() {
        let (tool, model, _dir) = tool(
            "```sql\nSELECT SUM(units) AS units FROM FACT_SALES WHERE model_id = 1 AND year = 2023;\n```",
        );
        let rows = tool.run("How many Camry units were sold in 2023?").await.unwrap();
        assert_eq!(rows.rows, vec![vec![json!(1520)]]);
        assert_eq!(rows.query, "SELECT SUM(units) AS units FROM FACT_SALES WHERE model_id = 1 AND year = 2023");

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("Values: Camry, RAV4, Corolla"));
    }

    #[tokio::test]
    async fn test_run_reports_malformed_query() {
        let (tool, _, _dir) = tool("SELECT units FROM sales_that_do_not_exist");
        let err = tool.run("units?").await.unwrap_err();
        assert!(matches!(err, SqlFailure::InvalidQuery { .. }));
    }

    #[tokio::test]
    async fn test_run_rejects_writes_before_execution() {
        let (tool, _, _dir) = tool("DELETE FROM FACT_SALES");
        let err = tool.run("wipe it").await.unwrap_err();
        assert!(matches!(err, SqlFailure::InvalidQuery { ref reason, .. } if reason.contains("SELECT")));
    }

    #[tokio::test]
    async fn test_run_reports_empty_result() {
        let (tool, _, _dir) = tool("SELECT * FROM FACT_SALES WHERE year = 1980");
        assert!(matches!(tool.run("1980 sales").await, Err(SqlFailure::EmptyResult { .. })));
    }

    #[tokio::test]
    async fn test_unavailable_tool_reports_connection_failure() {
        let tool = UnavailableSqlTool::new("sales database not found at /nope.db");
        assert!(matches!(
            tool.run("How many?").await,
            Err(SqlFailure::Connection { ref reason }) if reason.contains("/nope.db")
        ));
        assert!(tool.describe().await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_interrupts_only_its_own_query() {
        let (db, _dir) = fixture();
        let tool = ModelSqlTool::new(db.clone(), CannedModel::new(ENDLESS_QUERY), GenerateParams::default())
            .with_timeout(Duration::from_millis(200));
        tool.describe().await.unwrap();

        // A long but finite query from another request, in flight when the
        // first one times out
        let other = tokio::task::spawn_blocking(move || {
            db.query(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 3000000) SELECT COUNT(*) FROM c",
                1,
            )
        });

        let timed_out = tool.run("count forever").await;
        assert!(matches!(
            timed_out,
            Err(SqlFailure::Connection { ref reason }) if reason.contains("query timed out after 200ms")
        ));
        let rows = other.await.unwrap().unwrap();
        assert_eq!(rows.rows[0][0], json!(3_000_000));
    }

    #[cfg(feature = "duckdb")]
    #[tokio::test]
    async fn test_duckdb_timeout_interrupts_only_its_own_query() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duckdb");
        duckdb::Connection::open(&path).unwrap().execute_batch(STAR_SCHEMA).unwrap();
        let db = SalesDb::open(&path, Engine::DuckDb).unwrap();
        let tool = ModelSqlTool::new(
            db.clone(),
            CannedModel::new("SELECT SUM(range % 7) FROM range(4000000000000)"),
            GenerateParams::default(),
        )
        .with_timeout(Duration::from_millis(200));
        tool.describe().await.unwrap();

        let other = tokio::task::spawn_blocking(move || db.query("SELECT COUNT(*) AS n FROM range(3000000)", 1));

        // The runtime waits for the blocking worker on shutdown, so an
        // uninterrupted scan would hang this test
        let timed_out = tool.run("count forever").await;
        assert!(matches!(
            timed_out,
            Err(SqlFailure::Connection { ref reason }) if reason.contains("query timed out after 200ms")
        ));
        let rows = other.await.unwrap().unwrap();
        assert_eq!(rows.rows[0][0], json!(3_000_000));
    }

    #[tokio::test]
    async fn test_schema_load_is_bounded_by_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sales.db");
        // Sampling the dimension view never collects 50 distinct labels
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch(&format!(
                "{STAR_SCHEMA}
                 CREATE TABLE labels (label TEXT);
                 INSERT INTO labels VALUES ('only');
                 CREATE VIEW DIM_ENDLESS AS
                    WITH RECURSIVE c(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM c)
                    SELECT labels.label AS label FROM c, labels;"
            ))
            .unwrap();
        let db = SalesDb::open(&path, Engine::Sqlite).unwrap();
        let tool = ModelSqlTool::new(db, CannedModel::new("SELECT 1"), GenerateParams::default())
            .with_timeout(Duration::from_millis(200));

        let err = tool.describe().await.unwrap_err();
        assert!(err.to_string().contains("schema load timed out"));
        assert!(matches!(tool.run("How many?").await, Err(SqlFailure::Connection { .. })));
    }

    #[tokio::test]
    async fn test_schema_is_cached() {
        let (tool, _, _dir) = tool("SELECT 1");
        let first = tool.describe().await.unwrap();
        let second = tool.describe().await.unwrap();
        assert_eq!(first, second);
        assert!(first.contains("Table: FACT_SALES"));
    }
}
