//! # Crawlgate Server
//!
//! HTTP surface for team admission leases and the job queue, plus the
//! background janitor that keeps queue counters honest.

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
pub use routes::create_app;
