//! The question router.
//!
//! ```text
//! question ─► classify ─┬─ SQL ───────► SqlTool ───────┐
//!                       ├─ RETRIEVAL ─► Retriever ─────┼─► compose ─► Answer
//!                       ├─ BOTH ──────► join!(both) ───┘
//!                       └─ ambiguous ─────────────────────► fallback
//! ```
//!
//! Every branch runs under its own timeout. A failed branch degrades the
//! answer instead of failing the request; only "no tool fits" and "no branch
//! produced evidence" end in the `FAILED` state, and even then the caller gets
//! a polite reply.

use drivewise_core::config::DriveWiseConfig;
use drivewise_core::error::Result;
use drivewise_core::traits::{GenerateParams, Provider, Retriever, SqlTool};
use drivewise_core::types::{DocType, Passage, SqlFailure, SqlRows};
use std::sync::Arc;
use std::time::Duration;

use crate::answer::{Answer, RequestState, RequestTrace, RouteFailure, ToolCall, ToolOutput};
use crate::classifier::{Classification, Classifier, ModelClassifier, Route, RuleClassifier};
use crate::compose::{self, EMPTY_QUESTION_REPLY, Evidence, OUT_OF_SCOPE_REPLY};

/// Tunables for one router instance.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Parameters for the composition call.
    pub params: GenerateParams,
    pub top_k: usize,
    /// Deadline for the whole SQL branch (generation + execution).
    pub sql_timeout: Duration,
    /// Deadline for the whole retrieval branch (embedding + search).
    pub retrieval_timeout: Duration,
    pub model_timeout: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            params: GenerateParams::default(),
            top_k: 4,
            sql_timeout: Duration::from_secs(50),
            retrieval_timeout: Duration::from_secs(45),
            model_timeout: Duration::from_secs(60),
        }
    }
}

impl RouterSettings {
    pub fn from_config(config: &DriveWiseConfig) -> Self {
        let llm = Duration::from_secs(config.llm.timeout_secs);
        Self {
            params: GenerateParams {
                model: config.llm.model.clone(),
                temperature: config.llm.temperature,
                max_tokens: config.llm.max_tokens,
                stop: vec![],
            },
            top_k: config.retrieval.top_k.max(1),
            sql_timeout: Duration::from_secs(config.sql.timeout_secs) + llm,
            retrieval_timeout: Duration::from_secs(config.retrieval.timeout_secs) + llm,
            model_timeout: llm * 2,
        }
    }
}

/// Accumulates the parts of an [`Answer`] while a request is in flight.
struct Draft {
    request_id: String,
    question: String,
    route: Option<Route>,
    trace: RequestTrace,
    tool_calls: Vec<ToolCall>,
    failures: Vec<RouteFailure>,
}

impl Draft {
    fn new(question: &str) -> Self {
        let request_id = uuid::Uuid::new_v4().to_string();
        let trace = RequestTrace::new(&request_id);
        Self {
            request_id,
            question: question.to_string(),
            route: None,
            trace,
            tool_calls: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn fail(mut self, text: &str) -> Answer {
        self.trace.advance(RequestState::Failed);
        self.finish(text.to_string(), Vec::new())
    }

    fn finish(self, text: String, sources: Vec<String>) -> Answer {
        let state = self.trace.current();
        Answer {
            request_id: self.request_id,
            question: self.question,
            text,
            route: self.route,
            state,
            states: self.trace.into_states(),
            tool_calls: self.tool_calls,
            failures: self.failures,
            sources,
            created_at: chrono::Utc::now(),
        }
    }
}

/// Routes questions to the SQL tool, the retriever, or both.
pub struct Router {
    provider: Arc<dyn Provider>,
    sql: Arc<dyn SqlTool>,
    retriever: Arc<dyn Retriever>,
    classifier: Arc<dyn Classifier>,
    settings: RouterSettings,
}

impl Router {
    /// Router with the deterministic rule classifier.
    pub fn new(
        provider: Arc<dyn Provider>,
        sql: Arc<dyn SqlTool>,
        retriever: Arc<dyn Retriever>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            provider,
            sql,
            retriever,
            classifier: Arc::new(RuleClassifier::new()),
            settings,
        }
    }

    /// Router configured from `[router]`, `[llm]`, `[sql]` and `[retrieval]`.
    pub fn from_config(
        config: &DriveWiseConfig,
        provider: Arc<dyn Provider>,
        sql: Arc<dyn SqlTool>,
        retriever: Arc<dyn Retriever>,
    ) -> Self {
        let settings = RouterSettings::from_config(config);
        let classifier: Arc<dyn Classifier> = match config.router.classifier.trim().to_lowercase().as_str() {
            "model" => Arc::new(ModelClassifier::new(provider.clone(), settings.params.clone())),
            "rules" => Arc::new(RuleClassifier::new()),
            other => {
                tracing::warn!("⚠️ Unknown router.classifier '{}', using rules", other);
                Arc::new(RuleClassifier::new())
            }
        };
        Self::new(provider, sql, retriever, settings).with_classifier(classifier)
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn classifier_name(&self) -> &str {
        self.classifier.name()
    }

    pub async fn classify(&self, question: &str) -> Classification {
        self.classifier.classify(question.trim()).await
    }

    /// Schema description of the sales data.
    pub async fn describe_sql(&self) -> Result<String> {
        self.sql.describe().await
    }

    /// Answer a question. Never fails: degraded and failed requests still
    /// carry a readable reply.
    pub async fn route(&self, question: &str) -> Answer {
        let question = question.trim();
        let mut draft = Draft::new(question);

        if question.is_empty() {
            draft.failures.push(RouteFailure::ClassificationAmbiguous);
            return draft.fail(EMPTY_QUESTION_REPLY);
        }

        let decision = match self.classifier.classify(question).await {
            Classification::Route(decision) => decision,
            Classification::Ambiguous => {
                draft.trace.advance(RequestState::Classified);
                tracing::info!("🧭 [{}] No tool matches, answering with fallback", draft.request_id);
                draft.failures.push(RouteFailure::ClassificationAmbiguous);
                return draft.fail(OUT_OF_SCOPE_REPLY);
            }
        };
        let route = decision.route;
        draft.route = Some(route);
        draft.trace.advance(RequestState::Classified);
        tracing::info!(
            "🧭 [{}] Route: {} (structured {:.0}, document {:.0}, classifier {})",
            draft.request_id,
            route,
            decision.scores.structured,
            decision.scores.document,
            self.classifier.name()
        );

        draft.trace.advance(RequestState::querying(route));
        let sql_question = decision.sql_question(question);
        let retrieval_question = decision.retrieval_question(question);
        let (sql_branch, retrieval_branch) = match route {
            Route::Sql => (Some(self.run_sql(sql_question).await), None),
            Route::Retrieval => (None, Some(self.run_retrieval(retrieval_question, decision.doc_type).await)),
            Route::Both => {
                let (sql, docs) = tokio::join!(
                    self.run_sql(sql_question),
                    self.run_retrieval(retrieval_question, decision.doc_type)
                );
                (Some(sql), Some(docs))
            }
        };

        let mut rows: Option<SqlRows> = None;
        let mut passages: Vec<Passage> = Vec::new();
        let (mut sql_missing, mut documents_missing) = (false, false);

        if let Some((call, outcome)) = sql_branch {
            draft.tool_calls.push(call);
            match outcome {
                Ok(r) => rows = Some(r),
                Err(failure) => {
                    sql_missing = true;
                    draft.failures.push(failure);
                }
            }
        }
        if let Some((call, outcome)) = retrieval_branch {
            draft.tool_calls.push(call);
            match outcome {
                Ok(p) => passages = p,
                Err(failure) => {
                    documents_missing = true;
                    draft.failures.push(failure);
                }
            }
        }

        let evidence = Evidence {
            sql: rows.as_ref(),
            passages: &passages,
            sql_missing,
            documents_missing,
        };

        if evidence.is_empty() {
            if route == Route::Both {
                draft.failures.push(RouteFailure::BothBranchesFailed);
            }
            tracing::warn!("⚠️ [{}] No evidence from any branch, answering with fallback", draft.request_id);
            let reply = compose::no_evidence_reply(route, &draft.failures);
            return draft.fail(&reply);
        }

        draft.trace.advance(RequestState::Composing);
        let sources = compose::distinct_sources(&passages);
        let text = match self.compose(question, &evidence).await {
            Ok(text) => compose::finalize_text(&text, &sources),
            Err(reason) => {
                tracing::warn!("⚠️ [{}] Composition failed, returning evidence summary: {}", draft.request_id, reason);
                draft.failures.push(RouteFailure::ModelApiFailed { reason });
                compose::finalize_text(&compose::fallback_summary(&evidence), &sources)
            }
        };

        draft.trace.advance(RequestState::Done);
        tracing::info!(
            "✅ [{}] Answered via {} ({} degraded branch(es))",
            draft.request_id,
            route,
            draft.failures.len()
        );
        draft.finish(text, sources)
    }

    async fn run_sql(&self, question: &str) -> (ToolCall, std::result::Result<SqlRows, RouteFailure>) {
        let outcome = match tokio::time::timeout(self.settings.sql_timeout, self.sql.run(question)).await {
            Ok(result) => result,
            Err(_) => Err(SqlFailure::Connection {
                reason: format!("SQL branch timed out after {}s", self.settings.sql_timeout.as_secs()),
            }),
        };

        let output = match &outcome {
            Ok(rows) => ToolOutput::Rows(rows.clone()),
            Err(e) => ToolOutput::Failed(e.to_string()),
        };
        let call = ToolCall::sql(self.sql.name(), question, output);
        (call, outcome.map_err(|failure| RouteFailure::SqlExecutionFailed { failure }))
    }

    async fn run_retrieval(
        &self,
        question: &str,
        doc_type: Option<DocType>,
    ) -> (ToolCall, std::result::Result<Vec<Passage>, RouteFailure>) {
        let k = self.settings.top_k;
        let search = self.retriever.retrieve(question, k, doc_type);

        let (output, outcome) = match tokio::time::timeout(self.settings.retrieval_timeout, search).await {
            Ok(Ok(passages)) if passages.is_empty() => {
                (ToolOutput::Passages(vec![]), Err(RouteFailure::RetrievalEmpty { reason: None }))
            }
            Ok(Ok(passages)) => (ToolOutput::Passages(passages.clone()), Ok(passages)),
            Ok(Err(e)) => {
                tracing::warn!("⚠️ Retrieval failed: {}", e);
                let reason = e.to_string();
                (
                    ToolOutput::Failed(reason.clone()),
                    Err(RouteFailure::RetrievalEmpty { reason: Some(reason) }),
                )
            }
            Err(_) => {
                let reason = format!("retrieval timed out after {}s", self.settings.retrieval_timeout.as_secs());
                tracing::warn!("⚠️ {}", reason);
                (
                    ToolOutput::Failed(reason.clone()),
                    Err(RouteFailure::RetrievalEmpty { reason: Some(reason) }),
                )
            }
        };

        let call = ToolCall::retrieval(self.retriever.name(), question, k, doc_type, output);
        (call, outcome)
    }

    async fn compose(&self, question: &str, evidence: &Evidence<'_>) -> std::result::Result<String, String> {
        let messages = compose::compose_messages(question, evidence);
        let call = self.provider.chat(&messages, &self.settings.params);

        match tokio::time::timeout(self.settings.model_timeout, call).await {
            Ok(Ok(resp)) => resp
                .content
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .ok_or_else(|| "model returned an empty answer".to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("model call timed out after {}s", self.settings.model_timeout.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use drivewise_core::error::DriveWiseError;
    use drivewise_core::types::{Message, ProviderResponse};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum ModelMode {
        /// Reply with the evidence block it was given.
        Echo,
        Fixed(&'static str),
        /// Answer only after this many seconds.
        Slow(u64),
        Fail,
    }

    struct FakeModel {
        mode: ModelMode,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Provider for FakeModel {
        fn name(&self) -> &str {
            "fake"
        }

        async fn chat(&self, messages: &[Message], _: &GenerateParams) -> Result<ProviderResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let content = match &self.mode {
                ModelMode::Echo => messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                ModelMode::Fixed(reply) => reply.to_string(),
                ModelMode::Slow(secs) => {
                    tokio::time::sleep(Duration::from_secs(*secs)).await;
                    "late answer".to_string()
                }
                ModelMode::Fail => return Err(DriveWiseError::RateLimited("fake".into())),
            };
            Ok(ProviderResponse { content: Some(content), ..Default::default() })
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    struct FakeSql {
        result: std::result::Result<SqlRows, SqlFailure>,
        delay: Duration,
        questions: Mutex<Vec<String>>,
    }

    impl FakeSql {
        fn calls(&self) -> usize {
            self.questions.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SqlTool for FakeSql {
        async fn run(&self, question: &str) -> std::result::Result<SqlRows, SqlFailure> {
            self.questions.lock().unwrap().push(question.to_string());
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }

        async fn describe(&self) -> Result<String> {
            Ok("Table: FACT_SALES".into())
        }
    }

    enum Docs {
        Found(Vec<Passage>),
        Error,
    }

    struct FakeRetriever {
        docs: Docs,
        delay: Duration,
        queries: Mutex<Vec<(String, Option<DocType>)>>,
    }

    impl FakeRetriever {
        fn calls(&self) -> usize {
            self.queries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Retriever for FakeRetriever {
        async fn retrieve(&self, query: &str, _k: usize, doc_type: Option<DocType>) -> Result<Vec<Passage>> {
            self.queries.lock().unwrap().push((query.to_string(), doc_type));
            tokio::time::sleep(self.delay).await;
            match &self.docs {
                Docs::Found(p) => Ok(p.clone()),
                Docs::Error => Err(DriveWiseError::Retrieval("collection 'langchain' not found".into())),
            }
        }
    }

    fn camry_rows() -> SqlRows {
        SqlRows {
            query: "SELECT SUM(units) AS units FROM FACT_SALES".into(),
            columns: vec!["units".into()],
            rows: vec![vec![json!(1520)]],
            truncated: false,
        }
    }

    fn warranty_passages() -> Vec<Passage> {
        vec![Passage {
            text: "Transmission components are covered for 5 years or 60,000 miles.".into(),
            source: "docs/contracts/warranty.pdf".into(),
            score: 0.82,
        }]
    }

    struct Harness {
        router: Router,
        model: Arc<FakeModel>,
        sql: Arc<FakeSql>,
        retriever: Arc<FakeRetriever>,
    }

    fn harness(
        mode: ModelMode,
        sql: std::result::Result<SqlRows, SqlFailure>,
        docs: Docs,
        delays: (u64, u64),
    ) -> Harness {
        let model = Arc::new(FakeModel { mode, calls: AtomicUsize::new(0) });
        let sql = Arc::new(FakeSql {
            result: sql,
            delay: Duration::from_secs(delays.0),
            questions: Mutex::new(vec![]),
        });
        let retriever = Arc::new(FakeRetriever {
            docs,
            delay: Duration::from_secs(delays.1),
            queries: Mutex::new(vec![]),
        });
        let settings = RouterSettings {
            sql_timeout: Duration::from_secs(5),
            retrieval_timeout: Duration::from_secs(5),
            model_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let router = Router::new(model.clone(), sql.clone(), retriever.clone(), settings);
        Harness { router, model, sql, retriever }
    }

    fn happy(mode: ModelMode) -> Harness {
        harness(mode, Ok(camry_rows()), Docs::Found(warranty_passages()), (0, 0))
    }

    #[tokio::test]
    async fn test_sql_question_never_touches_retriever() {
        let h = happy(ModelMode::Echo);
        let answer = h.router.route("How many Camry units were sold in Texas in 2023?").await;

        assert_eq!(answer.route, Some(Route::Sql));
        assert_eq!(answer.state, RequestState::Done);
        assert!(answer.text.contains("1520"));
        assert_eq!(h.sql.calls(), 1);
        assert_eq!(h.retriever.calls(), 0);
        assert!(answer.sources.is_empty());
        assert!(!answer.text.contains("Sources:"));
        assert!(answer.failures.is_empty());
    }

    #[tokio::test]
    async fn test_warranty_question_is_attributed() {
        let h = happy(ModelMode::Echo);
        let answer = h.router.route("What does my warranty cover for transmission repairs?").await;

        assert_eq!(answer.route, Some(Route::Retrieval));
        assert_eq!(h.sql.calls(), 0);
        let queries = h.retriever.queries.lock().unwrap().clone();
        assert_eq!(queries[0].1, Some(DocType::Contracts));
        assert!(answer.text.contains("60,000 miles"));
        assert!(answer.text.ends_with("Sources: docs/contracts/warranty.pdf"));
        assert_eq!(answer.sources, vec!["docs/contracts/warranty.pdf"]);
    }

    #[tokio::test]
    async fn test_mixed_question_queries_both_with_sub_questions() {
        let h = happy(ModelMode::Echo);
        let answer = h
            .router
            .route("Compare RAV4 sales in California to what the manual says about AWD maintenance")
            .await;

        assert_eq!(answer.route, Some(Route::Both));
        assert_eq!(h.sql.questions.lock().unwrap().as_slice(), ["Compare RAV4 sales in California"]);
        let queries = h.retriever.queries.lock().unwrap().clone();
        assert_eq!(queries[0].0, "what the manual says about AWD maintenance");
        assert_eq!(queries[0].1, Some(DocType::UserManuals));
        assert!(answer.text.contains("1520"));
        assert!(answer.text.contains("Sources:"));
        assert_eq!(
            answer.states,
            vec![
                RequestState::Received,
                RequestState::Classified,
                RequestState::QueryingBoth,
                RequestState::Composing,
                RequestState::Done
            ]
        );
        assert_eq!(answer.tool_calls.len(), 2);
    }

    #[tokio::test]
    async fn test_off_topic_question_makes_no_calls() {
        let h = happy(ModelMode::Echo);
        let answer = h.router.route("What's the weather today?").await;

        assert_eq!(answer.route, None);
        assert_eq!(answer.state, RequestState::Failed);
        assert!(answer.is_fallback());
        assert_eq!(answer.text, OUT_OF_SCOPE_REPLY);
        assert_eq!(answer.failures, vec![RouteFailure::ClassificationAmbiguous]);
        assert_eq!(
            answer.states,
            vec![RequestState::Received, RequestState::Classified, RequestState::Failed]
        );
        assert!(answer.tool_details().is_none());
        assert_eq!(h.sql.calls(), 0);
        assert_eq!(h.retriever.calls(), 0);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_question() {
        let h = happy(ModelMode::Echo);
        let answer = h.router.route("   ").await;
        assert_eq!(answer.state, RequestState::Failed);
        assert_eq!(answer.text, EMPTY_QUESTION_REPLY);
        assert_eq!(h.sql.calls() + h.retriever.calls(), 0);
    }

    #[tokio::test]
    async fn test_both_degrades_when_sql_fails() {
        let h = harness(
            ModelMode::Echo,
            Err(SqlFailure::EmptyResult { query: "SELECT 1".into() }),
            Docs::Found(warranty_passages()),
            (0, 0),
        );
        let answer = h
            .router
            .route("Compare RAV4 sales in California to what the manual says about AWD maintenance")
            .await;

        assert_eq!(answer.state, RequestState::Done);
        assert!(answer.text.contains("No matching sales data"));
        assert!(answer.text.contains("Sources: docs/contracts/warranty.pdf"));
        assert!(matches!(answer.failures.as_slice(), [RouteFailure::SqlExecutionFailed { .. }]));
    }

    #[tokio::test]
    async fn test_both_degrades_when_retrieval_is_empty() {
        let h = harness(ModelMode::Echo, Ok(camry_rows()), Docs::Found(vec![]), (0, 0));
        let answer = h
            .router
            .route("Compare RAV4 sales in California to what the manual says about AWD maintenance")
            .await;

        assert_eq!(answer.state, RequestState::Done);
        assert!(answer.text.contains("1520"));
        assert!(answer.sources.is_empty());
        assert!(!answer.text.contains("Sources:"));
        assert_eq!(answer.failures, vec![RouteFailure::RetrievalEmpty { reason: None }]);
    }

    #[tokio::test]
    async fn test_both_with_no_passages_drops_model_citations() {
        let h = harness(
            ModelMode::Fixed(
                "RAV4 sold 1520 units [source: rav4_manual.pdf]. AWD needs service (Source - rav4_manual.pdf). Check fluid (see rav4_manual.pdf, p. 12).\n\nSources: owners_manual.pdf",
            ),
            Ok(camry_rows()),
            Docs::Found(vec![]),
            (0, 0),
        );
        let answer = h
            .router
            .route("Compare RAV4 sales in California to what the manual says about AWD maintenance")
            .await;

        assert_eq!(answer.state, RequestState::Done);
        assert_eq!(answer.text, "RAV4 sold 1520 units. AWD needs service. Check fluid.");
        assert!(answer.sources.is_empty());
    }

    #[tokio::test]
    async fn test_both_branches_failing_is_terminal() {
        let h = harness(
            ModelMode::Echo,
            Err(SqlFailure::InvalidQuery { query: "SELEC".into(), reason: "syntax error".into() }),
            Docs::Error,
            (0, 0),
        );
        let answer = h
            .router
            .route("Compare RAV4 sales in California to what the manual says about AWD maintenance")
            .await;

        assert_eq!(answer.state, RequestState::Failed);
        assert!(answer.text.starts_with("I'm sorry"));
        assert_eq!(answer.failures.last(), Some(&RouteFailure::BothBranchesFailed));
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
        // Both calls are still reported
        assert!(answer.tool_details().unwrap().contains("collection 'langchain' not found"));
    }

    #[tokio::test]
    async fn test_retrieval_only_with_no_passages_has_no_citation() {
        let h = harness(ModelMode::Fixed("See (source: brochure.pdf)."), Ok(camry_rows()), Docs::Found(vec![]), (0, 0));
        let answer = h.router.route("What does my warranty cover for transmission repairs?").await;

        assert_eq!(answer.state, RequestState::Failed);
        assert!(!answer.text.contains("source"));
        assert!(answer.sources.is_empty());
        assert_eq!(
            answer.failures,
            vec![RouteFailure::RetrievalEmpty { reason: None }]
        );
    }

    #[tokio::test]
    async fn test_unbacked_citations_are_removed() {
        let h = harness(
            ModelMode::Fixed("Covered for 5 years (source: docs/contracts/warranty.pdf). Free towing (source: brochure.pdf)."),
            Ok(camry_rows()),
            Docs::Found(warranty_passages()),
            (0, 0),
        );
        let answer = h.router.route("What does my warranty cover for transmission repairs?").await;
        assert!(answer.text.contains("(source: docs/contracts/warranty.pdf)"));
        assert!(!answer.text.contains("brochure.pdf"));
    }

    #[tokio::test]
    async fn test_model_failure_falls_back_to_evidence_summary() {
        let h = happy(ModelMode::Fail);
        let answer = h.router.route("How many Camry units were sold in Texas in 2023?").await;

        assert_eq!(answer.state, RequestState::Done);
        assert!(answer.text.contains("1520"));
        assert!(matches!(answer.failures.as_slice(), [RouteFailure::ModelApiFailed { .. }]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_model_falls_back_to_evidence_summary() {
        let h = happy(ModelMode::Slow(30));
        let answer = h.router.route("How many Camry units were sold in Texas in 2023?").await;

        assert_eq!(answer.state, RequestState::Done);
        assert!(answer.text.starts_with("I couldn't generate a full answer"));
        assert!(answer.text.contains("1520"));
        assert!(!answer.text.contains("late answer"));
        assert!(matches!(
            answer.failures.as_slice(),
            [RouteFailure::ModelApiFailed { reason }] if reason.contains("timed out after 5s")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_branches_run_concurrently() {
        let h = harness(ModelMode::Echo, Ok(camry_rows()), Docs::Found(warranty_passages()), (3, 3));
        let start = tokio::time::Instant::now();
        let answer = h
            .router
            .route("Compare RAV4 sales in California to what the manual says about AWD maintenance")
            .await;

        assert_eq!(answer.state, RequestState::Done);
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_sql_branch_times_out_and_degrades() {
        let h = harness(ModelMode::Echo, Ok(camry_rows()), Docs::Found(warranty_passages()), (60, 0));
        let answer = h
            .router
            .route("Compare RAV4 sales in California to what the manual says about AWD maintenance")
            .await;

        assert_eq!(answer.state, RequestState::Done);
        assert!(answer.text.contains("60,000 miles"));
        match answer.failures.as_slice() {
            [RouteFailure::SqlExecutionFailed { failure: SqlFailure::Connection { reason } }] => {
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected failures: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_retrieval_only_fails_politely() {
        let h = harness(ModelMode::Echo, Ok(camry_rows()), Docs::Found(warranty_passages()), (0, 60));
        let answer = h.router.route("What does my warranty cover for transmission repairs?").await;

        assert_eq!(answer.state, RequestState::Failed);
        assert!(answer.text.starts_with("I'm sorry"));
        assert!(matches!(
            answer.failures.as_slice(),
            [RouteFailure::RetrievalEmpty { reason: Some(r) }] if r.contains("timed out")
        ));
    }

    #[tokio::test]
    async fn test_routing_is_stable() {
        let h = happy(ModelMode::Echo);
        let q = "Compare RAV4 sales in California to what the manual says about AWD maintenance";
        let first = h.router.classify(q).await;
        for _ in 0..5 {
            assert_eq!(h.router.classify(q).await, first);
        }
    }

    #[test]
    fn test_settings_from_config() {
        let config = DriveWiseConfig::default();
        let settings = RouterSettings::from_config(&config);
        assert_eq!(settings.sql_timeout, Duration::from_secs(50));
        assert_eq!(settings.retrieval_timeout, Duration::from_secs(45));
        assert_eq!(settings.params.model, "gpt-4o-mini");
        assert_eq!(settings.top_k, 4);
    }

    #[test]
    fn test_from_config_picks_classifier() {
        let h = happy(ModelMode::Echo);
        let mut config = DriveWiseConfig::default();
        config.router.classifier = "model".into();
        let router = Router::from_config(&config, h.model.clone(), h.sql.clone(), h.retriever.clone());
        assert_eq!(router.classifier_name(), "model");

        config.router.classifier = "bogus".into();
        let router = Router::from_config(&config, h.model.clone(), h.sql.clone(), h.retriever.clone());
        assert_eq!(router.classifier_name(), "rules");
    }
}
