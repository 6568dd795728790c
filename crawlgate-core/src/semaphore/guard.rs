use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::TeamSemaphore;
use crate::config::AdmissionPlan;
use crate::error::GateError;
use crate::metrics::{MetricsSink, NoopMetrics, names};

/// Runs caller work while holding a team lease.
///
/// The lease is renewed every half TTL for as long as the work runs. Losing
/// it pre-empts the work with [`GateError::HeartbeatLost`]. The lease is
/// released on every exit path; release failures are only logged, the TTL
/// reclaims the slot.
#[derive(Debug, Clone)]
pub struct ConcurrencyGuard {
    semaphore: Arc<TeamSemaphore>,
    metrics: Arc<dyn MetricsSink>,
}

impl ConcurrencyGuard {
    pub fn new(semaphore: Arc<TeamSemaphore>) -> Self {
        Self {
            semaphore,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn semaphore(&self) -> &Arc<TeamSemaphore> {
        &self.semaphore
    }

    /// Acquire a lease for `holder_id`, run `work(limited)` under it and
    /// release it afterwards.
    ///
    /// `timeout` overrides the configured acquire budget. `limited` tells the
    /// work whether admission had to wait.
    pub async fn with_semaphore<T, E, F, Fut>(
        &self,
        team_id: &str,
        holder_id: &str,
        limit: u32,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<GateError>,
    {
        let config = self.semaphore.config();
        let limit = match config.bypass.plan(config.self_hosted, limit) {
            AdmissionPlan::Direct => {
                debug!(team_id, holder_id, limit, "Bypassing team semaphore");
                self.metrics.counter(names::ACQUIRE_BYPASSED, 1);
                return work(false).await;
            }
            AdmissionPlan::Acquire { limit } => limit,
        };

        let mut options = config.backoff();
        if let Some(timeout) = timeout {
            options.timeout = timeout;
        }

        let started = Instant::now();
        let grant = match self
            .semaphore
            .acquire_blocking(team_id, holder_id, limit, &options, cancel)
            .await
        {
            Ok(grant) => grant,
            Err(err) => {
                match &err {
                    GateError::AdmissionTimeout { .. } => {
                        self.metrics.counter(names::ACQUIRE_TIMEOUT, 1)
                    }
                    GateError::AdmissionAborted { .. } => {
                        self.metrics.counter(names::ACQUIRE_ABORTED, 1)
                    }
                    _ => {}
                }
                return Err(E::from(err));
            }
        };

        self.metrics.counter(names::ACQUIRE_GRANTED, 1);
        if grant.limited {
            self.metrics.counter(names::ACQUIRE_RETRIED, 1);
        }
        self.metrics
            .histogram(names::ACQUIRE_MS, elapsed_ms(started));
        self.metrics.counter(names::ACTIVE, 1);
        let hold = LeaseHold {
            semaphore: self.semaphore.clone(),
            metrics: self.metrics.clone(),
            team_id: team_id.to_string(),
            holder_id: holder_id.to_string(),
            started,
            settled: false,
        };

        let outcome = tokio::select! {
            result = work(grant.limited) => result,
            lost = self.heartbeat_loop(team_id, holder_id) => Err(E::from(lost)),
        };

        hold.release().await;
        outcome
    }

    /// Renews the lease every half TTL. Only returns once the lease is lost.
    async fn heartbeat_loop(&self, team_id: &str, holder_id: &str) -> GateError {
        let mut ticker = interval(self.semaphore.config().heartbeat_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match self.semaphore.heartbeat(team_id, holder_id, None).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(team_id, holder_id, "Lease lost, aborting guarded work");
                    self.metrics.counter(names::HEARTBEAT_LOST, 1);
                    return GateError::HeartbeatLost {
                        team_id: team_id.to_string(),
                        holder_id: holder_id.to_string(),
                    };
                }
                Err(err) => {
                    warn!(
                        team_id,
                        holder_id,
                        "Heartbeat failed, retrying on next tick: {}",
                        err
                    );
                }
            }
        }
    }
}

/// A granted lease owned by running guarded work.
///
/// When the caller drops `with_semaphore` mid-work the hold is dropped
/// without [`LeaseHold::release`]; the release then runs on a spawned task
/// so the slot does not stay taken until the TTL.
struct LeaseHold {
    semaphore: Arc<TeamSemaphore>,
    metrics: Arc<dyn MetricsSink>,
    team_id: String,
    holder_id: String,
    started: Instant,
    settled: bool,
}

impl LeaseHold {
    async fn release(mut self) {
        release_lease(&self.semaphore, &self.team_id, &self.holder_id).await;
        self.settle();
    }

    fn settle(&mut self) {
        self.settled = true;
        self.metrics.counter(names::ACTIVE, -1);
        self.metrics
            .histogram(names::TOTAL_MS, elapsed_ms(self.started));
    }
}

impl Drop for LeaseHold {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.settle();

        let semaphore = self.semaphore.clone();
        let team_id = std::mem::take(&mut self.team_id);
        let holder_id = std::mem::take(&mut self.holder_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(%team_id, %holder_id, "Guarded work dropped, releasing lease");
                handle.spawn(async move {
                    release_lease(&semaphore, &team_id, &holder_id).await;
                });
            }
            Err(_) => {
                warn!(%team_id, %holder_id, "No runtime to release lease on, leaving it to expire");
            }
        }
    }
}

async fn release_lease(semaphore: &TeamSemaphore, team_id: &str, holder_id: &str) {
    if let Err(err) = semaphore.release(team_id, holder_id).await {
        warn!(
            team_id,
            holder_id,
            "Failed to release lease, leaving it to expire: {}",
            err
        );
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1_000.0
}
