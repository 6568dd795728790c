//! # Crawlgate Core
//!
//! Admission control and job claiming for a multi-tenant crawling service.
//!
//! ## Overview
//!
//! - **Team semaphore**: lease-based, time-bounded admission capped per team
//!   ([`semaphore::TeamSemaphore`])
//! - **Concurrency guard**: acquire, heartbeat, run, release around a unit of
//!   work ([`semaphore::ConcurrencyGuard`])
//! - **Job queue**: priority-ordered queue with conflict-free claims
//!   ([`queue::KvQueue`], [`queue::Claimer`])
//! - **Janitor**: periodic cleanup and counter reconciliation ([`janitor::Janitor`])
//! - **Remote client**: the queue API over HTTP behind a circuit breaker
//!   ([`client::HttpQueueClient`])
//!
//! ## Feature Flags
//!
//! - `redis`: Enables the Redis-backed store ([`store::RedisStore`])
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use crawlgate_core::{
//!     config::SemaphoreConfig,
//!     error::GateError,
//!     semaphore::{ConcurrencyGuard, TeamSemaphore},
//!     store::MemoryStore,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! async fn scrape_one(guard: &ConcurrencyGuard) -> Result<String, GateError> {
//!     guard
//!         .with_semaphore("team-1", "request-42", 4, &CancellationToken::new(), None, |limited| async move {
//!             Ok::<_, GateError>(format!("scraped (waited: {limited})"))
//!         })
//!         .await
//! }
//!
//! # async fn run() -> Result<(), GateError> {
//! let semaphore = TeamSemaphore::new(Arc::new(MemoryStore::new()), SemaphoreConfig::default());
//! let guard = ConcurrencyGuard::new(Arc::new(semaphore));
//! scrape_one(&guard).await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod breaker;

pub mod client;

pub mod config;

pub mod error;

pub mod janitor;

pub mod metrics;

pub mod queue;

pub mod semaphore;

pub mod store;

pub mod time;

pub use error::{GateError, Result};
