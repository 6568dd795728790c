//! Request and response bodies for the team semaphore surface.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquireLeaseRequest {
    pub holder_id: String,
    pub limit: u32,
    /// Keep retrying with backoff for up to this long instead of answering
    /// after one attempt.
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireLeaseResponse {
    pub granted: bool,
    pub count: u64,
    pub removed: u64,
    /// True when at least one attempt was refused before the answer.
    #[serde(default)]
    pub limited: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatLeaseRequest {
    pub holder_id: String,
    /// Overrides the configured lease TTL when present.
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatLeaseResponse {
    pub granted: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseLeaseRequest {
    pub holder_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseCountResponse {
    pub count: u64,
}
