//! Question classification: which tools does a question need?

use async_trait::async_trait;
use drivewise_core::traits::{GenerateParams, Provider};
use drivewise_core::types::{DocType, Message};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::signals::{self, RouteScores};

/// Which tools a question is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Route {
    Sql,
    Retrieval,
    Both,
}

impl Route {
    pub fn uses_sql(&self) -> bool {
        matches!(self, Route::Sql | Route::Both)
    }

    pub fn uses_retrieval(&self) -> bool {
        matches!(self, Route::Retrieval | Route::Both)
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Route::Sql => "SQL",
            Route::Retrieval => "RETRIEVAL",
            Route::Both => "BOTH",
        })
    }
}

/// A routing decision, with optional per-branch sub-questions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDecision {
    pub route: Route,
    /// Part of the question handed to the SQL tool (BOTH only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,
    /// Part of the question handed to the retriever (BOTH only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<DocType>,
    pub scores: RouteScores,
}

impl RouteDecision {
    fn new(route: Route, scores: RouteScores) -> Self {
        Self {
            route,
            sql_query: None,
            retrieval_query: None,
            doc_type: None,
            scores,
        }
    }

    /// What the SQL tool should be asked.
    pub fn sql_question<'a>(&'a self, question: &'a str) -> &'a str {
        self.sql_query.as_deref().unwrap_or(question)
    }

    /// What the retriever should be asked.
    pub fn retrieval_question<'a>(&'a self, question: &'a str) -> &'a str {
        self.retrieval_query.as_deref().unwrap_or(question)
    }
}

/// Classifier output. `Ambiguous` means no tool is a fit.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Route(RouteDecision),
    Ambiguous,
}

impl Classification {
    pub fn route(&self) -> Option<Route> {
        match self {
            Classification::Route(d) => Some(d.route),
            Classification::Ambiguous => None,
        }
    }
}

/// Decides the route for a question.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, question: &str) -> Classification;
}

/// Deterministic keyword-signal classifier. The same question always yields
/// the same decision.
#[derive(Debug, Clone, Default)]
pub struct RuleClassifier;

impl RuleClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_question(&self, question: &str) -> Classification {
        let scores = signals::score(question);
        let route = match (scores.wants_sql(), scores.wants_documents()) {
            (true, true) => Route::Both,
            (true, false) => Route::Sql,
            (false, true) => Route::Retrieval,
            (false, false) => return Classification::Ambiguous,
        };

        let mut decision = RouteDecision::new(route, scores);
        match route {
            Route::Both => {
                if let Some((sql, docs)) = signals::split_sub_queries(question) {
                    decision.doc_type = signals::doc_type_hint(&docs);
                    decision.sql_query = Some(sql);
                    decision.retrieval_query = Some(docs);
                } else {
                    decision.doc_type = signals::doc_type_hint(question);
                }
            }
            Route::Retrieval => decision.doc_type = signals::doc_type_hint(question),
            Route::Sql => {}
        }
        Classification::Route(decision)
    }
}

#[async_trait]
impl Classifier for RuleClassifier {
    fn name(&self) -> &str {
        "rules"
    }

    async fn classify(&self, question: &str) -> Classification {
        self.classify_question(question)
    }
}

const CLASSIFIER_PROMPT: &str = r#"You route questions for an automotive assistant. Two tools exist:
- "sql": vehicle sales data (units sold, revenue, by model, country/region, year, powertrain).
- "retrieval": documents, either warranty/contract terms ("contracts") or owner's manuals ("user_manuals").

Reply with one JSON object and nothing else:
{"route": "sql" | "retrieval" | "both" | "none",
 "sql_query": "<part of the question for the sales data, or null>",
 "retrieval_query": "<part of the question for the documents, or null>",
 "doc_type": "contracts" | "user_manuals" | null}

Use "none" when neither tool can help."#;

#[derive(Debug, Deserialize)]
struct ModelVerdict {
    route: String,
    #[serde(default)]
    sql_query: Option<String>,
    #[serde(default)]
    retrieval_query: Option<String>,
    #[serde(default)]
    doc_type: Option<String>,
}

/// Parse the model's JSON verdict, tolerating prose or fences around it.
fn parse_verdict(raw: &str, scores: RouteScores) -> Option<Classification> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    let verdict: ModelVerdict = serde_json::from_str(&raw[start..=end]).ok()?;

    let route = match verdict.route.trim().to_lowercase().as_str() {
        "sql" => Route::Sql,
        "retrieval" => Route::Retrieval,
        "both" => Route::Both,
        "none" => return Some(Classification::Ambiguous),
        _ => return None,
    };

    let non_empty = |s: Option<String>| s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let mut decision = RouteDecision::new(route, scores);
    if route == Route::Both {
        decision.sql_query = non_empty(verdict.sql_query);
        decision.retrieval_query = non_empty(verdict.retrieval_query);
    }
    if route.uses_retrieval() {
        decision.doc_type = verdict.doc_type.as_deref().and_then(DocType::parse);
    }
    Some(Classification::Route(decision))
}

/// Classifier that asks the model (temperature 0) and falls back to the
/// rules when the call fails or the reply can't be parsed.
pub struct ModelClassifier {
    provider: Arc<dyn Provider>,
    params: GenerateParams,
    fallback: RuleClassifier,
}

impl ModelClassifier {
    pub fn new(provider: Arc<dyn Provider>, mut params: GenerateParams) -> Self {
        params.temperature = 0.0;
        params.max_tokens = params.max_tokens.min(300);
        Self {
            provider,
            params,
            fallback: RuleClassifier::new(),
        }
    }
}

#[async_trait]
impl Classifier for ModelClassifier {
    fn name(&self) -> &str {
        "model"
    }

    async fn classify(&self, question: &str) -> Classification {
        let messages = [Message::system(CLASSIFIER_PROMPT), Message::user(question)];
        let scores = signals::score(question);

        match self.provider.chat(&messages, &self.params).await {
            Ok(resp) => {
                let raw = resp.content.unwrap_or_default();
                if let Some(c) = parse_verdict(&raw, scores) {
                    return c;
                }
                tracing::warn!("⚠️ Unparseable classifier reply, using rules: {}", raw);
            }
            Err(e) => tracing::warn!("⚠️ Classifier model failed, using rules: {}", e),
        }
        self.fallback.classify_question(question)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivewise_core::error::{DriveWiseError, Result};
    use drivewise_core::types::ProviderResponse;

    struct Scripted(Option<&'static str>);

    #[async_trait]
    impl Provider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(&self, _: &[Message], params: &GenerateParams) -> Result<ProviderResponse> {
            assert_eq!(params.temperature, 0.0);
            match self.0 {
                Some(reply) => Ok(ProviderResponse {
                    content: Some(reply.into()),
                    ..Default::default()
                }),
                None => Err(DriveWiseError::Timeout("scripted".into())),
            }
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn rules(q: &str) -> Classification {
        RuleClassifier::new().classify_question(q)
    }

    #[test]
    fn test_rules_sql_question() {
        assert_eq!(rules("How many Camry units were sold in Texas in 2023?").route(), Some(Route::Sql));
    }

    #[test]
    fn test_rules_count_without_sales_noun() {
        assert_eq!(rules("How many Corollas in California in 2023?").route(), Some(Route::Sql));
        assert_eq!(rules("How many RAV4s did we move in Texas last year?").route(), Some(Route::Sql));
        assert_eq!(rules("How many years is the battery warranty?").route(), Some(Route::Retrieval));
    }

    #[test]
    fn test_rules_retrieval_question_with_doc_type() {
        let Classification::Route(d) = rules("What does my warranty cover for transmission repairs?") else {
            panic!("expected a route");
        };
        assert_eq!(d.route, Route::Retrieval);
        assert_eq!(d.doc_type, Some(DocType::Contracts));
    }

    #[test]
    fn test_rules_both_question_is_split() {
        let Classification::Route(d) =
            rules("Compare RAV4 sales in California to what the manual says about AWD maintenance")
        else {
            panic!("expected a route");
        };
        assert_eq!(d.route, Route::Both);
        assert_eq!(d.sql_question("ignored"), "Compare RAV4 sales in California");
        assert_eq!(d.retrieval_question("ignored"), "what the manual says about AWD maintenance");
        assert_eq!(d.doc_type, Some(DocType::UserManuals));
    }

    #[test]
    fn test_rules_off_topic_is_ambiguous() {
        assert_eq!(rules("What's the weather today?"), Classification::Ambiguous);
        assert_eq!(rules("Write me a poem about the sea"), Classification::Ambiguous);
    }

    #[test]
    fn test_rules_are_stable() {
        let q = "Compare RAV4 sales in California to what the manual says about AWD maintenance";
        let first = rules(q);
        for _ in 0..10 {
            assert_eq!(rules(q), first);
        }
    }

    #[test]
    fn test_parse_verdict() {
        let raw = "```json\n{\"route\": \"both\", \"sql_query\": \"RAV4 sales in CA\", \"retrieval_query\": \" \", \"doc_type\": \"user_manuals\"}\n```";
        let Some(Classification::Route(d)) = parse_verdict(raw, RouteScores::default()) else {
            panic!("expected a route");
        };
        assert_eq!(d.route, Route::Both);
        assert_eq!(d.sql_query.as_deref(), Some("RAV4 sales in CA"));
        assert_eq!(d.retrieval_query, None);
        assert_eq!(d.doc_type, Some(DocType::UserManuals));

        assert_eq!(
            parse_verdict(r#"{"route": "none"}"#, RouteScores::default()),
            Some(Classification::Ambiguous)
        );
        assert_eq!(parse_verdict(r#"{"route": "maybe"}"#, RouteScores::default()), None);
        assert_eq!(parse_verdict("I think SQL", RouteScores::default()), None);
    }

    #[tokio::test]
    async fn test_model_classifier_uses_verdict() {
        let c = ModelClassifier::new(
            Arc::new(Scripted(Some(r#"{"route": "retrieval", "doc_type": "contracts"}"#))),
            GenerateParams::default(),
        );
        let result = c.classify("Is corrosion included?").await;
        assert_eq!(result.route(), Some(Route::Retrieval));
    }

    #[tokio::test]
    async fn test_model_classifier_falls_back_to_rules() {
        let failing = ModelClassifier::new(Arc::new(Scripted(None)), GenerateParams::default());
        let q = "How many Camry units were sold in Texas in 2023?";
        assert_eq!(failing.classify(q).await.route(), Some(Route::Sql));

        let garbled = ModelClassifier::new(Arc::new(Scripted(Some("sql probably"))), GenerateParams::default());
        assert_eq!(garbled.classify("What's the weather today?").await, Classification::Ambiguous);
    }
}
