//! Ports to the shared atomic key-value store.
//!
//! Every method on [`LeaseStore`] and [`QueueStore`] is one atomic step
//! against the store: implementations must never split a method into
//! separately observable reads and writes. Multi-step protocols (claim then
//! verify, reconcile) are composed from these steps by the callers.

use std::fmt;

use async_trait::async_trait;
use crawlgate_model::{CounterKind, QueueKey, QueuedJob};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Result of one atomic evict-count-insert step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireOutcome {
    pub granted: bool,
    /// Live leases after eviction, and after insertion when granted.
    pub count: u64,
    /// Expired leases evicted by this call.
    pub removed: u64,
}

/// Lease sets keyed by an opaque string (one set per team).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeaseStore: Send + Sync + fmt::Debug {
    /// Evict expired leases, count the rest and insert `holder_id` when the
    /// count is below `limit`. Re-acquiring an already held lease refreshes it
    /// without consuming another slot.
    async fn acquire(
        &self,
        key: &str,
        holder_id: &str,
        limit: u32,
        now_ms: i64,
        ttl_ms: u64,
    ) -> Result<AcquireOutcome>;

    /// Extend a live lease to `now + ttl`. Returns false when the lease is
    /// gone, either released or expired.
    async fn renew(&self, key: &str, holder_id: &str, now_ms: i64, ttl_ms: u64) -> Result<bool>;

    /// Remove the lease. A missing lease is not an error.
    async fn release(&self, key: &str, holder_id: &str) -> Result<()>;

    /// Evict expired leases and return the live cardinality.
    async fn count(&self, key: &str, now_ms: i64) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}

/// Marker written by a worker that attempts to claim a job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRecord {
    pub worker_id: String,
    /// Encoded [`QueueKey`] of the claimed job.
    pub queue_key: String,
    pub claimed_at: i64,
}

/// A claim together with the version the store assigned to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredClaim {
    pub job_id: String,
    /// Strictly increasing across the whole store; the lowest version of a
    /// job owns it.
    pub version: u64,
    pub claim: ClaimRecord,
}

/// Owner dimension of active markers and sampled counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Team,
    Crawl,
}

impl Scope {
    pub fn active_counter(&self) -> CounterKind {
        match self {
            Scope::Team => CounterKind::TeamActive,
            Scope::Crawl => CounterKind::CrawlActive,
        }
    }

    pub fn queue_counter(&self) -> CounterKind {
        match self {
            Scope::Team => CounterKind::TeamQueue,
            Scope::Crawl => CounterKind::CrawlQueue,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Team => "team",
            Scope::Crawl => "crawl",
        }
    }
}

/// Queue records, claims, active markers and cached counters.
#[async_trait]
pub trait QueueStore: Send + Sync + fmt::Debug {
    /// Write the job with its TTL and crawl index entries and bump the team
    /// and crawl queue counters.
    async fn insert_job(&self, job: &QueuedJob) -> Result<()>;

    /// Snapshot of up to `limit` queued jobs of a team in serving order.
    async fn scan_team(&self, team_id: &str, limit: usize) -> Result<Vec<QueuedJob>>;

    async fn get_job(&self, key: &QueueKey) -> Result<Option<QueuedJob>>;

    /// Delete the job, its index entries and all of its claims, and decrement
    /// its counters. Returns `None` when the job was already gone.
    async fn remove_job(&self, key: &QueueKey) -> Result<Option<QueuedJob>>;

    /// Delete the job only if it still exists, has expired at `now_ms` and
    /// carries no claim.
    async fn remove_expired_job(&self, key: &QueueKey, now_ms: i64) -> Result<bool>;

    /// Keys of jobs whose timeout is before `now_ms`, oldest first, skipping
    /// the first `offset` entries.
    async fn expired_jobs(&self, now_ms: i64, offset: usize, limit: usize) -> Result<Vec<QueueKey>>;

    /// Append a claim under a fresh version, only if the job still exists.
    async fn append_claim(&self, key: &QueueKey, claim: &ClaimRecord) -> Result<Option<u64>>;

    /// Lowest-version claim of a job.
    async fn first_claim(&self, job_id: &str) -> Result<Option<StoredClaim>>;

    /// Move `claimed_at` of the owning claim to `now_ms`, only when that claim
    /// belongs to `worker_id`. False when the job is unclaimed or owned by
    /// another worker.
    async fn renew_claim(&self, job_id: &str, worker_id: &str, now_ms: i64) -> Result<bool>;

    /// Remove every claim of a job; returns how many were removed.
    async fn clear_claims(&self, job_id: &str) -> Result<u64>;

    /// Job ids that carry at least one claim, strictly after `after`.
    async fn claimed_jobs(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>>;

    /// Up to `limit` queued job ids of a team in serving order.
    async fn team_job_ids(&self, team_id: &str, limit: usize) -> Result<Vec<String>>;

    /// Upsert an active marker. The counter is only bumped when the marker is
    /// new; returns whether it was.
    async fn put_active(
        &self,
        scope: Scope,
        owner: &str,
        job_id: &str,
        expires_at: i64,
    ) -> Result<bool>;

    /// Remove an active marker, decrementing the counter only if it existed.
    async fn remove_active(&self, scope: Scope, owner: &str, job_id: &str) -> Result<bool>;

    /// All markers of an owner with their expiry, expired ones included.
    async fn list_active(&self, scope: Scope, owner: &str) -> Result<Vec<(String, i64)>>;

    /// Remove up to `limit` markers that expired before `now_ms`, adjusting
    /// counters. Returns how many were removed.
    async fn expire_active(&self, scope: Scope, now_ms: i64, limit: usize) -> Result<u64>;

    /// Cached counter value, 0 when absent.
    async fn get_counter(&self, kind: CounterKind, id: &str) -> Result<i64>;

    /// Overwrite a counter. Writing 0 deletes it.
    async fn set_counter(&self, kind: CounterKind, id: &str, value: i64) -> Result<()>;

    /// Recount the ground truth behind a counter and overwrite the cached
    /// value when it drifted by more than `tolerance`. Active markers count as
    /// live while `expires_at >= now_ms`. Returns the signed correction
    /// applied, 0 when the counter was left alone.
    async fn reconcile_counter(
        &self,
        kind: CounterKind,
        id: &str,
        now_ms: i64,
        tolerance: i64,
    ) -> Result<i64>;

    /// Ids that have a counter of `kind`, strictly after `after`, ascending.
    async fn counter_ids(
        &self,
        kind: CounterKind,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>>;

    async fn ping(&self) -> Result<()>;
}
