//! Job queue surface: push, claim, complete, release, counts and the sweeps
//! that keep cached counters honest.

use std::fmt;

use async_trait::async_trait;
use crawlgate_model::{ClaimedJob, CounterKind, JobSubmission};

use crate::error::Result;
use crate::store::Scope;

pub mod claimer;
pub mod kv;

pub use claimer::{Claimer, CrawlConcurrencyChecker};
pub use kv::KvQueue;

/// Operations a worker or producer can run against the queue, either
/// in-process ([`KvQueue`]) or remotely ([`crate::client::HttpQueueClient`]).
#[async_trait]
pub trait JobQueue: Send + Sync + fmt::Debug {
    /// Enqueue a job. `timeout_ms` only applies to jobs outside a crawl.
    async fn push(
        &self,
        team_id: &str,
        job: JobSubmission,
        timeout_ms: Option<i64>,
        crawl_id: Option<&str>,
    ) -> Result<()>;

    /// One claim attempt for `worker_id`. `None` when nothing eligible could
    /// be claimed, including when every candidate was lost to other workers.
    async fn pop(
        &self,
        team_id: &str,
        worker_id: &str,
        blocked_crawl_ids: &[String],
    ) -> Result<Option<ClaimedJob>>;

    /// Delete a claimed job. `false` when it was already gone.
    async fn complete(&self, queue_key: &str) -> Result<bool>;

    /// Drop every claim of a job so it can be popped again. `false` when the
    /// job held no claim.
    async fn release(&self, job_id: &str) -> Result<bool>;

    /// Heartbeat for a claim held by `worker_id`. Workers call this well
    /// within `claim_timeout_ms` while the job runs; `false` means the claim
    /// is gone or owned by someone else and the work should stop.
    async fn renew_claim(&self, job_id: &str, worker_id: &str) -> Result<bool>;

    async fn team_queue_count(&self, team_id: &str) -> Result<i64>;

    async fn crawl_queue_count(&self, crawl_id: &str) -> Result<i64>;

    async fn team_queued_job_ids(&self, team_id: &str, limit: u32) -> Result<Vec<String>>;

    async fn push_active(&self, scope: Scope, owner: &str, job_id: &str, timeout_ms: i64)
    -> Result<()>;

    async fn remove_active(&self, scope: Scope, owner: &str, job_id: &str) -> Result<()>;

    async fn active_count(&self, scope: Scope, owner: &str) -> Result<i64>;

    /// Ids of markers that have not expired yet.
    async fn active_jobs(&self, scope: Scope, owner: &str) -> Result<Vec<String>>;

    async fn clean_expired_jobs(&self) -> Result<i64>;

    async fn clean_expired_active_jobs(&self) -> Result<i64>;

    async fn clean_orphaned_claims(&self) -> Result<i64>;

    async fn clean_stale_counters(&self) -> Result<i64>;

    /// Recompute one counter from ground truth; returns the signed delta.
    async fn reconcile(&self, kind: CounterKind, id: &str) -> Result<i64>;

    /// Team or crawl ids with a queue counter, strictly after `after`.
    async fn sample(&self, scope: Scope, limit: u32, after: Option<&str>) -> Result<Vec<String>>;

    async fn ping(&self) -> Result<()>;
}
