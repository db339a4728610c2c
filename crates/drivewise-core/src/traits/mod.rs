//! Trait seams between the router and its external collaborators.

pub mod provider;
pub mod tools;

pub use provider::{EmbeddingProvider, GenerateParams, Provider};
pub use tools::{Retriever, SqlTool};
