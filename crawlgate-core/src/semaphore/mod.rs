//! Per-team lease semaphore over a [`LeaseStore`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{BackoffOptions, SemaphoreConfig};
use crate::error::{GateError, Result};
use crate::store::{AcquireOutcome, LeaseStore};
use crate::time::{Clock, SystemClock};

pub mod backoff;
pub mod guard;

pub use backoff::Backoff;
pub use guard::ConcurrencyGuard;

/// Result of a blocking acquire that ended in a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingAcquire {
    /// True when the first attempt was refused.
    pub limited: bool,
    /// Expired leases evicted across all attempts.
    pub removed: u64,
}

#[derive(Debug, Clone)]
pub struct TeamSemaphore {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    config: SemaphoreConfig,
}

impl TeamSemaphore {
    pub fn new(store: Arc<dyn LeaseStore>, config: SemaphoreConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SemaphoreConfig {
        &self.config
    }

    fn key(&self, team_id: &str) -> String {
        format!("{}:{}", self.config.key_prefix, team_id)
    }

    fn ttl_ms(&self) -> u64 {
        self.config.lease_ttl_ms
    }

    /// One atomic evict-count-insert attempt.
    pub async fn acquire(
        &self,
        team_id: &str,
        holder_id: &str,
        limit: u32,
    ) -> Result<AcquireOutcome> {
        let outcome = self
            .store
            .acquire(
                &self.key(team_id),
                holder_id,
                limit,
                self.clock.now_ms(),
                self.ttl_ms(),
            )
            .await?;

        if outcome.removed > 0 {
            debug!(
                team_id,
                removed = outcome.removed,
                "Evicted expired leases"
            );
        }
        Ok(outcome)
    }

    /// Retry [`acquire`](Self::acquire) until granted, cancelled or out of
    /// time. Cancellation and the deadline are checked between attempts.
    pub async fn acquire_blocking(
        &self,
        team_id: &str,
        holder_id: &str,
        limit: u32,
        options: &BackoffOptions,
        cancel: &CancellationToken,
    ) -> Result<BlockingAcquire> {
        let started = Instant::now();
        let deadline = started + options.timeout;
        let mut backoff = Backoff::new(options);
        let mut limited = false;
        let mut removed = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(GateError::AdmissionAborted {
                    team_id: team_id.to_string(),
                });
            }

            let outcome = self.acquire(team_id, holder_id, limit).await?;
            removed += outcome.removed;
            if outcome.granted {
                return Ok(BlockingAcquire { limited, removed });
            }
            limited = true;

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    team_id,
                    holder_id,
                    limit,
                    count = outcome.count,
                    "Admission timed out"
                );
                return Err(GateError::AdmissionTimeout {
                    team_id: team_id.to_string(),
                    waited: now - started,
                });
            }

            let delay = backoff.next_delay().min(deadline - now);
            debug!(
                team_id,
                holder_id,
                count = outcome.count,
                delay_ms = delay.as_millis() as u64,
                "Team at concurrency limit, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Extend a live lease. `ttl` defaults to the configured lease TTL.
    pub async fn heartbeat(
        &self,
        team_id: &str,
        holder_id: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let ttl_ms = ttl.map_or(self.ttl_ms(), |ttl| ttl.as_millis() as u64);
        self.store
            .renew(&self.key(team_id), holder_id, self.clock.now_ms(), ttl_ms)
            .await
    }

    /// Drop a lease. Releasing a lease that is already gone is a no-op.
    pub async fn release(&self, team_id: &str, holder_id: &str) -> Result<()> {
        self.store.release(&self.key(team_id), holder_id).await
    }

    /// Live leases of a team. Expired leases are evicted first.
    pub async fn count(&self, team_id: &str) -> Result<u64> {
        self.store
            .count(&self.key(team_id), self.clock.now_ms())
            .await
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::time::ManualClock;

    fn semaphore(clock: Arc<ManualClock>) -> TeamSemaphore {
        TeamSemaphore::new(Arc::new(MemoryStore::new()), SemaphoreConfig::default())
            .with_clock(clock)
    }

    fn options(timeout_ms: u64) -> BackoffOptions {
        BackoffOptions {
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(1_000),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test]
    async fn limit_of_two_admits_two_holders() {
        let sem = semaphore(Arc::new(ManualClock::new(1_000)));

        let a = sem.acquire("T", "A", 2).await.unwrap();
        assert!(a.granted);
        assert_eq!(a.count, 1);

        let b = sem.acquire("T", "B", 2).await.unwrap();
        assert!(b.granted);
        assert_eq!(b.count, 2);

        let c = sem.acquire("T", "C", 2).await.unwrap();
        assert!(!c.granted);
        assert_eq!(c.count, 2);

        sem.release("T", "A").await.unwrap();
        let c = sem.acquire("T", "C", 2).await.unwrap();
        assert!(c.granted);
        assert_eq!(c.count, 2);
    }

    #[tokio::test]
    async fn release_twice_is_harmless() {
        let sem = semaphore(Arc::new(ManualClock::new(0)));
        sem.acquire("T", "A", 3).await.unwrap();
        sem.acquire("T", "B", 3).await.unwrap();

        sem.release("T", "A").await.unwrap();
        sem.release("T", "A").await.unwrap();
        assert_eq!(sem.count("T").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_lease_is_gone_for_count_and_heartbeat() {
        let clock = Arc::new(ManualClock::new(0));
        let sem = semaphore(clock.clone());
        sem.acquire("T", "A", 1).await.unwrap();

        clock.advance(Duration::from_millis(30_000));
        assert_eq!(sem.count("T").await.unwrap(), 0);
        assert!(!sem.heartbeat("T", "A", None).await.unwrap());
    }

    #[tokio::test]
    async fn heartbeating_at_half_ttl_keeps_the_lease() {
        let clock = Arc::new(ManualClock::new(0));
        let sem = semaphore(clock.clone());
        sem.acquire("T", "A", 1).await.unwrap();

        for _ in 0..10 {
            clock.advance(sem.config().heartbeat_interval());
            assert!(sem.heartbeat("T", "A", None).await.unwrap());
        }
        assert!(!sem.acquire("T", "B", 1).await.unwrap().granted);
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_acquire_times_out_when_full() {
        let sem = semaphore(Arc::new(ManualClock::new(0)));
        sem.acquire("T", "A", 1).await.unwrap();

        let err = sem
            .acquire_blocking("T", "B", 1, &options(500), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::AdmissionTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_aborts_before_any_attempt() {
        let sem = semaphore(Arc::new(ManualClock::new(0)));
        let token = CancellationToken::new();
        token.cancel();

        let err = sem
            .acquire_blocking("T", "A", 5, &options(0), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::AdmissionAborted { .. }));
        assert_eq!(sem.count("T").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_acquire_reports_limited_after_retry() {
        let sem = Arc::new(semaphore(Arc::new(ManualClock::new(0))));
        sem.acquire("T", "A", 1).await.unwrap();

        let releaser = {
            let sem = sem.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                sem.release("T", "A").await.unwrap();
            })
        };

        let grant = sem
            .acquire_blocking("T", "B", 1, &options(5_000), &CancellationToken::new())
            .await
            .unwrap();
        assert!(grant.limited);
        releaser.await.unwrap();
    }
}
