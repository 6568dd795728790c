//! Metrics emitted by the concurrency guard.
//!
//! The guard reports through an injected [`MetricsSink`] and owns no global
//! state. [`GuardStats`] is an in-process sink that aggregates between
//! periodic health reports.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod names {
    pub const ACQUIRE_GRANTED: &str = "semaphore.acquire.granted";
    pub const ACQUIRE_RETRIED: &str = "semaphore.acquire.retried";
    pub const ACQUIRE_TIMEOUT: &str = "semaphore.acquire.timeout";
    pub const ACQUIRE_ABORTED: &str = "semaphore.acquire.aborted";
    pub const ACQUIRE_BYPASSED: &str = "semaphore.acquire.bypassed";
    pub const HEARTBEAT_LOST: &str = "semaphore.heartbeat_lost";
    /// Gauge: +1 when work starts under a lease, -1 when it ends.
    pub const ACTIVE: &str = "semaphore.active";
    pub const ACQUIRE_MS: &str = "semaphore.acquire_ms";
    pub const TOTAL_MS: &str = "semaphore.total_ms";
}

pub trait MetricsSink: Send + Sync + fmt::Debug {
    fn counter(&self, name: &'static str, delta: i64);
    fn histogram(&self, name: &'static str, value_ms: f64);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn counter(&self, _name: &'static str, _delta: i64) {}
    fn histogram(&self, _name: &'static str, _value_ms: f64) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
}

impl HistogramSummary {
    fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub counters: BTreeMap<&'static str, i64>,
    pub histograms: BTreeMap<&'static str, HistogramSummary>,
}

impl StatsSnapshot {
    pub fn counter(&self, name: &str) -> i64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

/// Aggregating sink for health logging.
#[derive(Debug, Default)]
pub struct GuardStats {
    counters: Mutex<BTreeMap<&'static str, i64>>,
    histograms: Mutex<BTreeMap<&'static str, HistogramSummary>>,
}

impl GuardStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            counters: self.counters.lock().clone(),
            histograms: self.histograms.lock().clone(),
        }
    }

    /// Take a snapshot and start a fresh window. The active gauge carries
    /// over since it tracks work still in flight.
    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let counters = {
            let mut counters = self.counters.lock();
            let active = counters.get(names::ACTIVE).copied();
            let taken = std::mem::take(&mut *counters);
            if let Some(active) = active {
                counters.insert(names::ACTIVE, active);
            }
            taken
        };
        let histograms = std::mem::take(&mut *self.histograms.lock());

        StatsSnapshot {
            counters,
            histograms,
        }
    }
}

impl MetricsSink for GuardStats {
    fn counter(&self, name: &'static str, delta: i64) {
        *self.counters.lock().entry(name).or_insert(0) += delta;
    }

    fn histogram(&self, name: &'static str, value_ms: f64) {
        self.histograms
            .lock()
            .entry(name)
            .or_default()
            .record(value_ms);
    }
}

/// Log a health summary every `every` until `shutdown` fires.
pub fn spawn_health_reporter(
    stats: Arc<GuardStats>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut report_interval = interval(every);
        report_interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = report_interval.tick() => {}
            }

            let snapshot = stats.snapshot_and_reset();
            let acquire = snapshot
                .histograms
                .get(names::ACQUIRE_MS)
                .copied()
                .unwrap_or_default();
            let total = snapshot
                .histograms
                .get(names::TOTAL_MS)
                .copied()
                .unwrap_or_default();

            info!(
                granted = snapshot.counter(names::ACQUIRE_GRANTED),
                retried = snapshot.counter(names::ACQUIRE_RETRIED),
                timeouts = snapshot.counter(names::ACQUIRE_TIMEOUT),
                aborted = snapshot.counter(names::ACQUIRE_ABORTED),
                bypassed = snapshot.counter(names::ACQUIRE_BYPASSED),
                heartbeat_lost = snapshot.counter(names::HEARTBEAT_LOST),
                active = snapshot.counter(names::ACTIVE),
                "Semaphore health - acquire avg {:.1}ms (max {:.1}ms), total avg {:.1}ms (max {:.1}ms)",
                acquire.mean(),
                acquire.max,
                total.mean(),
                total.max
            );
        }
    })
}
