//! Periodic sweeps that reap expired state and pull cached counters back to
//! ground truth. Every step is idempotent and safe next to live traffic.

use std::future::Future;
use std::sync::Arc;

use crawlgate_model::CounterKind;
use futures::future::try_join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::JanitorConfig;
use crate::error::Result;
use crate::queue::JobQueue;
use crate::store::Scope;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JanitorReport {
    pub expired_jobs: i64,
    pub expired_active: i64,
    pub orphaned_claims: i64,
    /// Sampled counters that needed a correction.
    pub reconciled: i64,
    /// Sum of absolute corrections applied to sampled counters.
    pub drift: i64,
    pub stale_counters: i64,
    /// Steps that failed, as `step: error`.
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
struct SampleCursors {
    team: Option<String>,
    crawl: Option<String>,
}

impl SampleCursors {
    fn slot(&mut self, scope: Scope) -> &mut Option<String> {
        match scope {
            Scope::Team => &mut self.team,
            Scope::Crawl => &mut self.crawl,
        }
    }
}

#[derive(Debug)]
pub struct Janitor {
    queue: Arc<dyn JobQueue>,
    config: JanitorConfig,
    cursors: Mutex<SampleCursors>,
}

impl Janitor {
    pub fn new(queue: Arc<dyn JobQueue>, config: JanitorConfig) -> Self {
        Self {
            queue,
            config,
            cursors: Mutex::new(SampleCursors::default()),
        }
    }

    /// One full pass. A failing step is recorded in the report and the
    /// remaining steps still run.
    pub async fn run_once(&self) -> JanitorReport {
        let mut report = JanitorReport::default();

        report.expired_jobs = step(
            &mut report.errors,
            "clean_expired_jobs",
            self.queue.clean_expired_jobs(),
        )
        .await;
        report.expired_active = step(
            &mut report.errors,
            "clean_expired_active_jobs",
            self.queue.clean_expired_active_jobs(),
        )
        .await;
        report.orphaned_claims = step(
            &mut report.errors,
            "clean_orphaned_claims",
            self.queue.clean_orphaned_claims(),
        )
        .await;

        for scope in [Scope::Team, Scope::Crawl] {
            if let Err(err) = self.reconcile_sample(scope, &mut report).await {
                warn!(scope = scope.as_str(), "Sampled reconciliation failed: {}", err);
                report
                    .errors
                    .push(format!("reconcile_{}: {err}", scope.as_str()));
            }
        }

        report.stale_counters = step(
            &mut report.errors,
            "clean_stale_counters",
            self.queue.clean_stale_counters(),
        )
        .await;

        info!(
            expired_jobs = report.expired_jobs,
            expired_active = report.expired_active,
            orphaned_claims = report.orphaned_claims,
            reconciled = report.reconciled,
            stale_counters = report.stale_counters,
            errors = report.errors.len(),
            "Janitor pass finished"
        );
        report
    }

    /// Repeat [`run_once`](Self::run_once) every interval until `shutdown`
    /// fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Janitor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }
    }

    /// Reconcile the queue and active counters of the next sample batch,
    /// resuming where the previous pass stopped.
    async fn reconcile_sample(&self, scope: Scope, report: &mut JanitorReport) -> Result<()> {
        let after = self.cursors.lock().slot(scope).clone();
        let batch = self.config.sample_batch;
        let ids = self.queue.sample(scope, batch, after.as_deref()).await?;

        for id in &ids {
            let deltas = try_join_all(
                counters_of(scope).map(|kind| self.queue.reconcile(kind, id)),
            )
            .await?;
            for delta in deltas.into_iter().filter(|delta| *delta != 0) {
                report.reconciled += 1;
                report.drift += delta.abs();
            }
        }

        // A short page means the keyspace was walked; start over next time.
        let next = if ids.len() < batch as usize {
            None
        } else {
            ids.last().cloned()
        };
        *self.cursors.lock().slot(scope) = next;
        Ok(())
    }
}

fn counters_of(scope: Scope) -> [CounterKind; 2] {
    [scope.queue_counter(), scope.active_counter()]
}

async fn step(
    errors: &mut Vec<String>,
    name: &'static str,
    work: impl Future<Output = Result<i64>>,
) -> i64 {
    match work.await {
        Ok(count) => count,
        Err(err) => {
            warn!(step = name, "Janitor step failed: {}", err);
            errors.push(format!("{name}: {err}"));
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::queue::KvQueue;
    use crate::store::{MemoryStore, QueueStore};
    use crawlgate_model::JobSubmission;

    #[tokio::test]
    async fn sampling_cursor_walks_then_wraps() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(KvQueue::new(store.clone(), QueueConfig::default()));
        for team in ["a", "b", "c"] {
            queue
                .push(team, JobSubmission::new(format!("{team}-1"), 0), None, None)
                .await
                .unwrap();
        }
        store.set_counter(CounterKind::TeamQueue, "c", 9).await.unwrap();

        let janitor = Janitor::new(
            queue,
            JanitorConfig {
                sample_batch: 2,
                ..JanitorConfig::default()
            },
        );

        let mut report = JanitorReport::default();
        janitor.reconcile_sample(Scope::Team, &mut report).await.unwrap();
        assert_eq!(report.reconciled, 0);
        assert_eq!(janitor.cursors.lock().team.as_deref(), Some("b"));

        janitor.reconcile_sample(Scope::Team, &mut report).await.unwrap();
        assert_eq!((report.reconciled, report.drift), (1, 8));
        assert_eq!(janitor.cursors.lock().team, None);
        assert_eq!(store.get_counter(CounterKind::TeamQueue, "c").await.unwrap(), 1);
    }
}
