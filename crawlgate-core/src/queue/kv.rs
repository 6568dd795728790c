use std::sync::Arc;

use async_trait::async_trait;
use crawlgate_model::{ClaimedJob, CounterKind, JobSubmission, QueueKey, QueuedJob};
use tracing::{debug, info, warn};

use super::JobQueue;
use crate::config::{JanitorConfig, QueueConfig};
use crate::error::Result;
use crate::store::{ClaimRecord, QueueStore, Scope};
use crate::time::{Clock, SystemClock};

/// Claim protocol and counter maintenance over a [`QueueStore`].
///
/// A pop appends a versioned claim and then reads back the lowest version;
/// the worker that owns it wins. Store atomicity makes that lowest version
/// identical for every racer, so exactly one of them sees its own id.
#[derive(Debug, Clone)]
pub struct KvQueue {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    sweep: JanitorConfig,
}

impl KvQueue {
    pub fn new(store: Arc<dyn QueueStore>, config: QueueConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config,
            sweep: JanitorConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Page sizes and drift tolerance used by the cleanup sweeps.
    pub fn with_sweep_config(mut self, sweep: JanitorConfig) -> Self {
        self.sweep = sweep;
        self
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    async fn try_claim(&self, job: &QueuedJob, worker_id: &str, now_ms: i64) -> Result<bool> {
        if self.store.first_claim(&job.id).await?.is_some() {
            return Ok(false);
        }

        let key = job.queue_key();
        let claim = ClaimRecord {
            worker_id: worker_id.to_string(),
            queue_key: key.encode(),
            claimed_at: now_ms,
        };
        let Some(version) = self.store.append_claim(&key, &claim).await? else {
            return Ok(false);
        };

        let won = self
            .store
            .first_claim(&job.id)
            .await?
            .is_some_and(|first| first.claim.worker_id == worker_id);

        if !won {
            debug!(job_id = %job.id, worker_id, version, "Lost claim race");
        }
        Ok(won)
    }

    /// A claim is orphaned when its job is gone, its queue key is unreadable,
    /// or its worker stopped renewing it for longer than `claim_timeout_ms`.
    async fn is_orphaned(&self, job_id: &str, now_ms: i64) -> Result<bool> {
        let Some(first) = self.store.first_claim(job_id).await? else {
            return Ok(false);
        };

        if now_ms - first.claim.claimed_at > self.config.claim_timeout_ms {
            return Ok(true);
        }

        match QueueKey::decode(&first.claim.queue_key) {
            Ok(key) => Ok(self.store.get_job(&key).await?.is_none()),
            Err(err) => {
                warn!(job_id, "Claim carries an unreadable queue key: {}", err);
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl JobQueue for KvQueue {
    async fn push(
        &self,
        team_id: &str,
        job: JobSubmission,
        timeout_ms: Option<i64>,
        crawl_id: Option<&str>,
    ) -> Result<()> {
        let now = self.clock.now_ms();
        let times_out_at = match (crawl_id, timeout_ms) {
            (None, Some(timeout)) if timeout > 0 => Some(now + timeout),
            _ => None,
        };

        let queued = QueuedJob {
            id: job.id,
            data: job.data,
            priority: job.priority,
            listenable: job.listenable,
            created_at: now,
            times_out_at,
            listen_channel_id: job.listen_channel_id,
            crawl_id: crawl_id.map(str::to_string),
            team_id: team_id.to_string(),
        };

        self.store.insert_job(&queued).await?;
        debug!(team_id, job_id = %queued.id, crawl_id, "Queued job");
        Ok(())
    }

    async fn pop(
        &self,
        team_id: &str,
        worker_id: &str,
        blocked_crawl_ids: &[String],
    ) -> Result<Option<ClaimedJob>> {
        let now = self.clock.now_ms();
        let candidates = self
            .store
            .scan_team(team_id, self.config.pop_scan_limit)
            .await?;

        for job in candidates {
            if job.is_expired(now) {
                if let Err(err) = self.store.remove_expired_job(&job.queue_key(), now).await {
                    debug!(job_id = %job.id, "Failed to drop expired job during pop: {}", err);
                }
                continue;
            }

            if job
                .crawl_id
                .as_ref()
                .is_some_and(|crawl_id| blocked_crawl_ids.contains(crawl_id))
            {
                continue;
            }

            if self.try_claim(&job, worker_id, now).await? {
                debug!(team_id, job_id = %job.id, worker_id, "Claimed job");
                let queue_key = job.queue_key().encode();
                return Ok(Some(ClaimedJob {
                    job,
                    queue_key,
                    worker_id: worker_id.to_string(),
                }));
            }
        }

        Ok(None)
    }

    async fn complete(&self, queue_key: &str) -> Result<bool> {
        let key = QueueKey::decode(queue_key)?;
        let removed = self.store.remove_job(&key).await?;
        if removed.is_none() {
            debug!(job_id = %key.job_id, "Completed job was already gone");
        }
        Ok(removed.is_some())
    }

    async fn release(&self, job_id: &str) -> Result<bool> {
        let cleared = self.store.clear_claims(job_id).await?;
        Ok(cleared > 0)
    }

    async fn renew_claim(&self, job_id: &str, worker_id: &str) -> Result<bool> {
        let renewed = self
            .store
            .renew_claim(job_id, worker_id, self.clock.now_ms())
            .await?;
        if !renewed {
            debug!(job_id, worker_id, "Claim renewal refused");
        }
        Ok(renewed)
    }

    async fn team_queue_count(&self, team_id: &str) -> Result<i64> {
        self.store.get_counter(CounterKind::TeamQueue, team_id).await
    }

    async fn crawl_queue_count(&self, crawl_id: &str) -> Result<i64> {
        self.store.get_counter(CounterKind::CrawlQueue, crawl_id).await
    }

    async fn team_queued_job_ids(&self, team_id: &str, limit: u32) -> Result<Vec<String>> {
        let limit = limit.min(self.config.max_queued_ids) as usize;
        self.store.team_job_ids(team_id, limit).await
    }

    async fn push_active(
        &self,
        scope: Scope,
        owner: &str,
        job_id: &str,
        timeout_ms: i64,
    ) -> Result<()> {
        let expires_at = self.clock.now_ms() + timeout_ms;
        self.store.put_active(scope, owner, job_id, expires_at).await?;
        Ok(())
    }

    async fn remove_active(&self, scope: Scope, owner: &str, job_id: &str) -> Result<()> {
        self.store.remove_active(scope, owner, job_id).await?;
        Ok(())
    }

    async fn active_count(&self, scope: Scope, owner: &str) -> Result<i64> {
        let count = self.store.get_counter(scope.active_counter(), owner).await?;
        Ok(count.max(0))
    }

    async fn active_jobs(&self, scope: Scope, owner: &str) -> Result<Vec<String>> {
        let now = self.clock.now_ms();
        Ok(self
            .store
            .list_active(scope, owner)
            .await?
            .into_iter()
            .filter(|(_, expires_at)| *expires_at >= now)
            .map(|(job_id, _)| job_id)
            .collect())
    }

    async fn clean_expired_jobs(&self) -> Result<i64> {
        let now = self.clock.now_ms();
        let page_size = self.sweep.page_size;
        let mut skipped = 0;
        let mut cleaned = 0;

        for _ in 0..self.sweep.max_pages {
            let keys = self.store.expired_jobs(now, skipped, page_size).await?;
            let fetched = keys.len();

            for key in keys {
                if self.store.remove_expired_job(&key, now).await? {
                    cleaned += 1;
                } else {
                    skipped += 1;
                }
            }

            if fetched < page_size {
                break;
            }
        }

        if cleaned > 0 {
            info!(cleaned, "Removed expired queued jobs");
        }
        Ok(cleaned)
    }

    async fn clean_expired_active_jobs(&self) -> Result<i64> {
        let now = self.clock.now_ms();
        let budget = self.sweep.max_pages * self.sweep.page_size;
        let mut cleaned = 0;

        for scope in [Scope::Team, Scope::Crawl] {
            cleaned += self.store.expire_active(scope, now, budget).await? as i64;
        }

        if cleaned > 0 {
            info!(cleaned, "Removed expired active markers");
        }
        Ok(cleaned)
    }

    async fn clean_orphaned_claims(&self) -> Result<i64> {
        let now = self.clock.now_ms();
        let page_size = self.sweep.page_size;
        let mut after: Option<String> = None;
        let mut cleaned = 0;

        for _ in 0..self.sweep.max_pages {
            let job_ids = self
                .store
                .claimed_jobs(after.as_deref(), page_size)
                .await?;

            for job_id in &job_ids {
                if self.is_orphaned(job_id, now).await? {
                    let removed = self.store.clear_claims(job_id).await?;
                    debug!(job_id = %job_id, removed, "Cleared orphaned claims");
                    cleaned += removed as i64;
                }
            }

            if job_ids.len() < page_size {
                break;
            }
            after = job_ids.last().cloned();
        }

        if cleaned > 0 {
            info!(cleaned, "Removed orphaned claims");
        }
        Ok(cleaned)
    }

    async fn clean_stale_counters(&self) -> Result<i64> {
        let now = self.clock.now_ms();
        let page_size = self.sweep.page_size;
        let tolerance = self.sweep.drift_tolerance;
        let mut corrected = 0;

        for kind in CounterKind::ALL {
            let mut after: Option<String> = None;

            for _ in 0..self.sweep.max_pages {
                let ids = self
                    .store
                    .counter_ids(kind, after.as_deref(), page_size)
                    .await?;

                for id in &ids {
                    let delta = self
                        .store
                        .reconcile_counter(kind, id, now, tolerance)
                        .await?;
                    if delta != 0 {
                        debug!(counter = %kind, id = %id, delta, "Rewrote stale counter");
                        corrected += 1;
                    }
                }

                if ids.len() < page_size {
                    break;
                }
                after = ids.last().cloned();
            }
        }

        if corrected > 0 {
            info!(corrected, "Corrected stale counters");
        }
        Ok(corrected)
    }

    async fn reconcile(&self, kind: CounterKind, id: &str) -> Result<i64> {
        let delta = self
            .store
            .reconcile_counter(kind, id, self.clock.now_ms(), 0)
            .await?;
        if delta != 0 {
            info!(counter = %kind, id, delta, "Reconciled counter");
        }
        Ok(delta)
    }

    async fn sample(&self, scope: Scope, limit: u32, after: Option<&str>) -> Result<Vec<String>> {
        self.store
            .counter_ids(scope.queue_counter(), after, limit as usize)
            .await
    }

    async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::time::ManualClock;

    fn queue(clock: Arc<ManualClock>) -> KvQueue {
        KvQueue::new(Arc::new(MemoryStore::new()), QueueConfig::default()).with_clock(clock)
    }

    #[tokio::test]
    async fn pop_serves_lowest_priority_value_first() {
        let clock = Arc::new(ManualClock::new(1_000));
        let q = queue(clock.clone());

        q.push("T", JobSubmission::new("slow", 10), None, None).await.unwrap();
        clock.advance(std::time::Duration::from_millis(1));
        q.push("T", JobSubmission::new("fast", 1), None, None).await.unwrap();

        let first = q.pop("T", "w", &[]).await.unwrap().unwrap();
        assert_eq!(first.job.id, "fast");
        let second = q.pop("T", "w", &[]).await.unwrap().unwrap();
        assert_eq!(second.job.id, "slow");
        assert!(q.pop("T", "w", &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn crawl_jobs_never_expire_from_push_timeout() {
        let clock = Arc::new(ManualClock::new(0));
        let q = queue(clock.clone());

        q.push("T", JobSubmission::new("solo", 0), Some(100), None).await.unwrap();
        q.push("T", JobSubmission::new("crawled", 0), Some(100), Some("C"))
            .await
            .unwrap();

        clock.advance(std::time::Duration::from_millis(500));
        let claimed = q.pop("T", "w", &[]).await.unwrap().unwrap();
        assert_eq!(claimed.job.id, "crawled");

        // The expired solo job is dropped on the way, never handed out.
        assert!(q.pop("T", "w", &[]).await.unwrap().is_none());
        assert_eq!(q.team_queue_count("T").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn blocked_crawls_are_skipped() {
        let q = queue(Arc::new(ManualClock::new(0)));
        q.push("T", JobSubmission::new("j", 0), None, Some("C")).await.unwrap();

        let blocked = vec!["C".to_string()];
        assert!(q.pop("T", "w", &blocked).await.unwrap().is_none());
        assert!(q.pop("T", "w", &[]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn released_job_can_be_claimed_again() {
        let q = queue(Arc::new(ManualClock::new(0)));
        q.push("T", JobSubmission::new("j", 0), None, None).await.unwrap();

        let claimed = q.pop("T", "w1", &[]).await.unwrap().unwrap();
        assert!(q.pop("T", "w2", &[]).await.unwrap().is_none());

        assert!(q.release(&claimed.job.id).await.unwrap());
        let again = q.pop("T", "w2", &[]).await.unwrap().unwrap();
        assert_eq!(again.job.id, "j");
    }

    #[tokio::test]
    async fn malformed_queue_key_is_rejected() {
        let q = queue(Arc::new(ManualClock::new(0)));
        let err = q.complete("%%%").await.unwrap_err();
        assert!(matches!(err, crate::error::GateError::InvalidQueueKey(_)));
    }

    #[tokio::test]
    async fn active_count_is_clamped_and_listing_filters_expired() {
        let clock = Arc::new(ManualClock::new(0));
        let q = queue(clock.clone());

        q.store()
            .set_counter(CounterKind::TeamActive, "T", -3)
            .await
            .unwrap();
        assert_eq!(q.active_count(Scope::Team, "T").await.unwrap(), 0);

        q.push_active(Scope::Team, "T", "short", 10).await.unwrap();
        q.push_active(Scope::Team, "T", "long", 1_000).await.unwrap();
        clock.advance(std::time::Duration::from_millis(50));

        assert_eq!(q.active_jobs(Scope::Team, "T").await.unwrap(), ["long"]);
    }
}
