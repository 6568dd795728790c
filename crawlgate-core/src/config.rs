use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global knobs for the admission gate, the queue and its janitor.
///
/// All fields carry defaults so deployments only override what they need.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Lease TTL, backoff, and bypass policy for the team semaphore.
    pub semaphore: SemaphoreConfig,
    /// Claim timeouts and scan windows for the queue.
    pub queue: QueueConfig,
    /// Sweep cadence and reconciliation batch sizes.
    pub janitor: JanitorConfig,
    /// Failure threshold and cooldown for remote queue clients.
    pub breaker: BreakerConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SemaphoreConfig {
    /// Lease lifetime without a heartbeat. Heartbeats fire at half this value.
    pub lease_ttl_ms: u64,
    /// First retry delay of a blocking acquire.
    pub base_delay_ms: u64,
    /// Ceiling for the growing retry delay (jitter is added on top).
    pub max_delay_ms: u64,
    /// Default budget for a blocking acquire.
    pub acquire_timeout_ms: u64,
    /// Store key prefix; the lease set of a team lives at `{prefix}:{team_id}`.
    pub key_prefix: String,
    /// Whether this deployment is self-hosted. Bypass only applies when true.
    pub self_hosted: bool,
    pub bypass: BypassPolicy,
}

impl SemaphoreConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis((self.lease_ttl_ms / 2).max(1))
    }

    pub fn backoff(&self) -> BackoffOptions {
        BackoffOptions {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            timeout: Duration::from_millis(self.acquire_timeout_ms),
        }
    }
}

impl Default for SemaphoreConfig {
    fn default() -> Self {
        Self {
            lease_ttl_ms: 30_000,
            base_delay_ms: 25,
            max_delay_ms: 1_000,
            acquire_timeout_ms: 60_000,
            key_prefix: "concurrency-limiter".to_string(),
            self_hosted: false,
            bypass: BypassPolicy::Disabled,
        }
    }
}

/// Retry shape for a blocking acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

/// What a self-hosted deployment does with small limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BypassPolicy {
    /// Always go through the semaphore.
    #[default]
    Disabled,
    /// Run the work directly, without a lease, when `limit <= threshold`.
    Bypass { threshold: u32 },
    /// Acquire with `substitute_limit` instead when `limit <= threshold`.
    Substitute { threshold: u32, substitute_limit: u32 },
}

/// Outcome of applying a [`BypassPolicy`] to a requested limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionPlan {
    Direct,
    Acquire { limit: u32 },
}

impl BypassPolicy {
    pub fn plan(&self, self_hosted: bool, limit: u32) -> AdmissionPlan {
        if !self_hosted {
            return AdmissionPlan::Acquire { limit };
        }
        match *self {
            BypassPolicy::Disabled => AdmissionPlan::Acquire { limit },
            BypassPolicy::Bypass { threshold } if limit <= threshold => AdmissionPlan::Direct,
            BypassPolicy::Substitute {
                threshold,
                substitute_limit,
            } if limit <= threshold => AdmissionPlan::Acquire {
                limit: substitute_limit,
            },
            _ => AdmissionPlan::Acquire { limit },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How many queued jobs a single pop inspects before giving up.
    pub pop_scan_limit: usize,
    /// A claim older than this is treated as orphaned by the janitor.
    pub claim_timeout_ms: i64,
    /// Hard cap on `team queued job ids` listings.
    pub max_queued_ids: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            pop_scan_limit: 100,
            claim_timeout_ms: 15 * 60 * 1_000,
            max_queued_ids: 100_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JanitorConfig {
    /// Pause between sweeps.
    pub interval_ms: u64,
    /// Team ids and crawl ids reconciled per sweep.
    pub sample_batch: u32,
    /// Absolute drift tolerated before `clean_stale_counters` rewrites a counter.
    pub drift_tolerance: i64,
    /// Page budget per sweep for batched scans.
    pub max_pages: usize,
    /// Entries per page for batched scans.
    pub page_size: usize,
}

impl JanitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            sample_batch: 50,
            drift_tolerance: 0,
            max_pages: 10,
            page_size: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Time the breaker stays open before admitting one trial call.
    pub open_duration_ms: u64,
    /// Per-request timeout for remote calls.
    pub request_timeout_ms: u64,
}

impl BreakerConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_ms: 30_000,
            request_timeout_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypass_only_applies_when_self_hosted() {
        let policy = BypassPolicy::Bypass { threshold: 1 };
        assert_eq!(policy.plan(false, 1), AdmissionPlan::Acquire { limit: 1 });
        assert_eq!(policy.plan(true, 1), AdmissionPlan::Direct);
        assert_eq!(policy.plan(true, 2), AdmissionPlan::Acquire { limit: 2 });
    }

    #[test]
    fn substitute_swaps_in_the_large_limit() {
        let policy = BypassPolicy::Substitute {
            threshold: 0,
            substitute_limit: 1_000_000,
        };
        assert_eq!(
            policy.plan(true, 0),
            AdmissionPlan::Acquire { limit: 1_000_000 }
        );
        assert_eq!(policy.plan(true, 3), AdmissionPlan::Acquire { limit: 3 });
    }

    #[test]
    fn heartbeat_interval_is_half_the_ttl() {
        let cfg = SemaphoreConfig::default();
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(15));
    }

    #[test]
    fn bypass_policy_reads_from_tagged_toml_style_json() {
        let raw = r#"{"mode":"substitute","threshold":1,"substitute_limit":500}"#;
        let policy: BypassPolicy = serde_json::from_str(raw).expect("parses");
        assert_eq!(
            policy,
            BypassPolicy::Substitute {
                threshold: 1,
                substitute_limit: 500
            }
        );
    }
}
