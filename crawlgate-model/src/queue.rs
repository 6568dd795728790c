//! Request and response bodies for the queue surface.

use serde::{Deserialize, Serialize};

use crate::job::{ClaimedJob, JobSubmission};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushJobRequest {
    pub team_id: String,
    pub job: JobSubmission,
    /// Milliseconds until the queued job expires; `None` for no expiry.
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub crawl_id: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopJobRequest {
    pub worker_id: String,
    #[serde(default)]
    pub blocked_crawl_ids: Vec<String>,
}

/// `null` on the wire when nothing could be claimed.
pub type PopJobResponse = Option<ClaimedJob>;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteJobRequest {
    pub queue_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseJobRequest {
    pub job_id: String,
}

/// Heartbeat for a claim; keeps the janitor from treating it as orphaned.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewClaimRequest {
    pub job_id: String,
    pub worker_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJobIdsQuery {
    pub limit: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobIdsResponse {
    pub job_ids: Vec<String>,
}

/// Body for team and crawl active-marker pushes and removals. `timeout` is
/// only read on push.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveJobRequest {
    pub job_id: String,
    #[serde(default)]
    pub timeout: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub cleaned: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResponse {
    pub correction: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampleQuery {
    pub limit: Option<u32>,
    pub after: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleResponse {
    pub ids: Vec<String>,
}
