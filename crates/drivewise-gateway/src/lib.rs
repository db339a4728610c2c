//! # DriveWise Gateway
//! HTTP API in front of the question router.
//!
//! - `GET /health`
//! - `POST /api/v1/chat` with `{"question": "..."}`
//! - `GET /api/v1/schema`

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
