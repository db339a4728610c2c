//! # DriveWise Agent
//! Question routing for the DriveWise assistant.
//!
//! A question is classified as needing the sales database (SQL), the
//! document store (RETRIEVAL) or both. The selected tools run (concurrently
//! for BOTH, each under a timeout), and the model composes an answer from
//! whatever evidence came back.
//!
//! ## Modules
//! - [`signals`]: regex intent scoring and sub-question splitting
//! - [`classifier`]: rule and model classifiers
//! - [`router`]: dispatch, degradation and the request lifecycle
//! - [`compose`]: prompts, evidence formatting and citation checks
//! - [`answer`]: the [`Answer`] returned to callers

pub mod answer;
pub mod classifier;
pub mod compose;
pub mod router;
pub mod signals;

pub use answer::{Answer, RequestState, RouteFailure, ToolCall, ToolOutput};
pub use classifier::{Classification, Classifier, ModelClassifier, Route, RouteDecision, RuleClassifier};
pub use router::{Router, RouterSettings};
