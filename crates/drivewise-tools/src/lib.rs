//! # DriveWise Tools
//!
//! The two capabilities the router dispatches to:
//! - **SQL** (`run_sql`): the model writes a read-only query against the
//!   sales database (SQLite, or DuckDB with the `duckdb` feature), which is
//!   executed on its own connection with a row cap and a timeout
//! - **Retrieval** (`retrieve`): semantic passage search over warranty,
//!   contract and owner-manual documents held in Chroma
//!
//! ## How a question flows
//! ```text
//! "How many Camry units were sold in Texas?"
//!   ↓ run_sql
//! schema + rules ─► model ─► SELECT ... ─► SalesDb ─► rows
//!
//! "What does my warranty cover?"
//!   ↓ retrieve
//! embed(question) ─► Chroma query (doc_type filter) ─► top-K passages
//! ```

#[cfg(feature = "duckdb")]
mod duckdb_store;
pub mod retrieval;
pub mod sales_db;
pub mod sql;

pub use retrieval::ChromaRetriever;
pub use sales_db::{Engine, SalesDb};
pub use sql::{ModelSqlTool, UnavailableSqlTool};
