//! # DriveWise Core
//!
//! Shared building blocks for every DriveWise crate:
//! - **config**: TOML configuration with env overrides
//! - **error**: the crate-wide error type
//! - **types**: messages, SQL rows, retrieved passages
//! - **traits**: seams for the model API, the SQL tool and the retriever

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::DriveWiseConfig;
pub use error::{DriveWiseError, Result};
