//! Regex-based intent signals.
//!
//! Two independent scores per question: how strongly it asks for a
//! structured aggregation over sales data, and how strongly it asks for a
//! lookup in warranty/contract/manual documents. A side is selected when its
//! score reaches [`SIGNAL_THRESHOLD`].

use regex::Regex;
use std::sync::LazyLock;

use drivewise_core::types::DocType;

/// Minimum score for a capability to be selected.
pub const SIGNAL_THRESHOLD: f32 = 10.0;

// --- Structured (SQL) patterns ---

static AGGREGATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(how\s+many|how\s+much|number\s+of|count|total|sum|average|avg|median|top\s+\d+|rank(ed|ing)?|most\s+(sold|popular)|best[-\s]selling|percentage|market\s+share|trend|growth|year[-\s]over[-\s]year|yoy)\b").unwrap()
});

static SALES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(sales?|sold|sell(ing|s)?|revenue|deliver(y|ies|ed)|registrations?|registered|inventory)\b").unwrap()
});

// Measure words that also appear in manuals ("audio volume", "unit")
static MEASURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(units?|volumes?|figures?)\b").unwrap());

static BREAKDOWN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(by|per|across|for\s+each)\s+(region|country|countries|state|model|year|month|quarter|powertrain|dealer|segment)s?\b").unwrap()
});

static PERIOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b((19|20)\d{2}|q[1-4]|(last|this|previous|past)\s+(year|quarter|month))\b").unwrap()
});

static COMPARE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(compare|comparison|versus|vs\.?)\b").unwrap());

// --- Document (retrieval) patterns ---

static CONTRACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(warrant(y|ies)|guarantee[sd]?|coverage|covered|covers?|contracts?|clauses?|terms|polic(y|ies)|agreements?|lease|obligations?|liabilit(y|ies)|exclusions?|void)\b").unwrap()
});

static MANUAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(manuals?|owner'?s\s+manual|handbook|instructions?|procedures?|maintenance|service\s+(interval|schedule)s?|how\s+(do|to|should)\s+i|specifications?|tire\s+pressure|oil|fluids?|warning\s+lights?|indicators?|reset)\b").unwrap()
});

static DOCUMENT_PHRASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(what\s+(does|do|did)\s+(the|my|our)\s+[\w\s']{1,30}?\s+(say|cover|state|mention|include)|according\s+to|says?\s+about|what\s+is\s+covered)").unwrap()
});

// --- Split points for questions that need both capabilities ---

static CONNECTOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*[;,]\s*(?:and\s+also\s+|and\s+|but\s+|plus\s+)?|\s+(?:compared\s+(?:to|with)|versus|vs\.?|as\s+well\s+as|and\s+also|and|to|with|but|plus)\s+").unwrap()
});

/// Per-capability scores for a question.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct RouteScores {
    pub structured: f32,
    pub document: f32,
}

impl RouteScores {
    pub fn wants_sql(&self) -> bool {
        self.structured >= SIGNAL_THRESHOLD
    }

    pub fn wants_documents(&self) -> bool {
        self.document >= SIGNAL_THRESHOLD
    }
}

/// Score a question on both capabilities.
pub fn score(question: &str) -> RouteScores {
    RouteScores {
        structured: score_structured(question),
        document: score_document(question),
    }
}

/// Aggregation words ("how many", "total") count in full unless the question
/// also carries document vocabulary with no sales noun or breakdown to
/// outweigh it ("how many miles does the warranty cover").
fn score_structured(q: &str) -> f32 {
    let sales = SALES_RE.is_match(q);
    let breakdown = BREAKDOWN_RE.is_match(q);
    let measure = MEASURE_RE.is_match(q);
    let document_vocab = CONTRACT_RE.is_match(q) || MANUAL_RE.is_match(q);

    let mut score = 0.0;
    if AGGREGATION_RE.is_match(q) {
        score += if sales || breakdown || !document_vocab { 10.0 } else { 3.0 };
    }
    if sales {
        score += 10.0;
    }
    if breakdown {
        score += 8.0;
    }
    if measure {
        score += 4.0;
    }
    if PERIOD_RE.is_match(q) {
        score += 4.0;
    }
    if COMPARE_RE.is_match(q) {
        score += 2.0;
    }
    score
}

fn score_document(q: &str) -> f32 {
    let mut score = 0.0;
    if CONTRACT_RE.is_match(q) || MANUAL_RE.is_match(q) {
        score += 10.0;
    }
    if DOCUMENT_PHRASE_RE.is_match(q) {
        score += 15.0;
    }
    score
}

/// Which document family a retrieval question is about, when unambiguous.
pub fn doc_type_hint(question: &str) -> Option<DocType> {
    match (CONTRACT_RE.is_match(question), MANUAL_RE.is_match(question)) {
        (true, false) => Some(DocType::Contracts),
        (false, true) => Some(DocType::UserManuals),
        _ => None,
    }
}

/// Split a two-part question into `(sql_part, document_part)`.
///
/// Tries each connector ("compared to", "and", "to", ...) left to right and
/// returns the first split where one side reads as a structured query and the
/// other as a document lookup.
pub fn split_sub_queries(question: &str) -> Option<(String, String)> {
    for m in CONNECTOR_RE.find_iter(question) {
        let left = tidy(&question[..m.start()]);
        let right = tidy(&question[m.end()..]);
        if left.is_empty() || right.is_empty() {
            continue;
        }
        let (l, r) = (score(&left), score(&right));
        if l.wants_sql() && !l.wants_documents() && r.wants_documents() {
            return Some((left, right));
        }
        if l.wants_documents() && !l.wants_sql() && r.wants_sql() {
            return Some((right, left));
        }
    }
    None
}

fn tidy(part: &str) -> String {
    part.trim()
        .trim_matches(|c: char| c == ',' || c == ';')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sales_question_scores_structured_only() {
        let s = score("How many Camry units were sold in Texas in 2023?");
        assert!(s.wants_sql());
        assert!(!s.wants_documents());
    }

    #[test]
    fn test_warranty_question_scores_document_only() {
        let s = score("What does my warranty cover for transmission repairs?");
        assert!(s.wants_documents());
        assert!(!s.wants_sql());
        assert!(s.document >= 25.0);
    }

    #[test]
    fn test_mixed_question_scores_both() {
        let s = score("Compare RAV4 sales in California to what the manual says about AWD maintenance");
        assert!(s.wants_sql());
        assert!(s.wants_documents());
    }

    #[test]
    fn test_off_topic_scores_nothing() {
        assert_eq!(score("What's the weather today?"), RouteScores::default());
        assert_eq!(score("Tell me a joke"), RouteScores::default());
    }

    #[test]
    fn test_weak_signals_alone_do_not_select() {
        // A bare year or "compare" is not enough for SQL
        let s = score("What happened in 2023?");
        assert!(!s.wants_sql());
        let s = score("Compare these two");
        assert!(!s.wants_sql());
    }

    #[test]
    fn test_aggregation_words_in_document_questions() {
        for q in [
            "How many miles does the powertrain warranty cover?",
            "What does the manual say about adjusting the audio volume?",
            "How long is the total warranty coverage period?",
            "How many years is the battery warranty?",
        ] {
            let s = score(q);
            assert!(!s.wants_sql(), "{q} scored {s:?}");
            assert!(s.wants_documents(), "{q} scored {s:?}");
        }
    }

    #[test]
    fn test_aggregation_without_sales_noun() {
        for q in [
            "How many Corollas in California in 2023?",
            "What was the average price of a Camry in 2023?",
            "Top 5 models in Europe in 2024",
            "How many Camrys were bought in Texas in 2023?",
            "How many RAV4s did we move in Texas last year?",
        ] {
            let s = score(q);
            assert!(s.wants_sql(), "{q} scored {s:?}");
            assert!(!s.wants_documents(), "{q} scored {s:?}");
        }
    }

    #[test]
    fn test_relative_period_is_weak() {
        assert!(!score("What happened last year?").wants_sql());
    }

    #[test]
    fn test_plain_questions_are_not_aggregations() {
        assert!(!score("What does the check engine light mean?").wants_sql());
    }

    #[test]
    fn test_measure_words_need_aggregation() {
        assert!(!score("Which unit is the tire pressure shown in?").wants_sql());
        assert!(!score("Volume figures").wants_sql());
        assert!(score("How many units in Texas in 2023?").wants_sql());
    }

    #[test]
    fn test_breakdown_question() {
        assert!(score("Show revenue by region for Q3").wants_sql());
        assert!(score("Total deliveries per powertrain").wants_sql());
    }

    #[test]
    fn test_doc_type_hint() {
        assert_eq!(doc_type_hint("Is rust damage covered by the warranty?"), Some(DocType::Contracts));
        assert_eq!(doc_type_hint("How do I reset the tire pressure warning light?"), Some(DocType::UserManuals));
        assert_eq!(doc_type_hint("Does the warranty require following the maintenance schedule?"), None);
        assert_eq!(doc_type_hint("How many units were sold?"), None);
    }

    #[test]
    fn test_split_sub_queries() {
        let (sql, docs) =
            split_sub_queries("Compare RAV4 sales in California to what the manual says about AWD maintenance").unwrap();
        assert_eq!(sql, "Compare RAV4 sales in California");
        assert_eq!(docs, "what the manual says about AWD maintenance");
    }

    #[test]
    fn test_split_sub_queries_reversed_order() {
        let (sql, docs) =
            split_sub_queries("What does the warranty cover for hybrids, and how many hybrid units were sold in 2023?")
                .unwrap();
        assert_eq!(sql, "how many hybrid units were sold in 2023?");
        assert_eq!(docs, "What does the warranty cover for hybrids");
    }

    #[test]
    fn test_split_none_for_single_intent() {
        assert!(split_sub_queries("How many Camry units were sold in Texas and California?").is_none());
    }
}
