//! Wire-level data model shared by the crawlgate server, core library and
//! remote clients.
#![allow(missing_docs)]

pub mod counters;
pub mod error;
pub mod job;
pub mod lease;
pub mod queue;

// Intentionally curated re-exports for downstream consumers.
pub use counters::CounterKind;
pub use error::ModelError;
pub use job::{ClaimedJob, JobSubmission, QueueKey, QueuedJob};
pub use lease::{
    AcquireLeaseRequest, AcquireLeaseResponse, HeartbeatLeaseRequest,
    HeartbeatLeaseResponse, LeaseCountResponse, ReleaseLeaseRequest,
};
pub use queue::{
    ActiveJobRequest, CleanupResponse, CompleteJobRequest, CountResponse,
    JobIdsResponse, PopJobRequest, PopJobResponse, PushJobRequest,
    QueuedJobIdsQuery, ReconcileResponse, ReleaseJobRequest, RenewClaimRequest,
    SampleQuery, SampleResponse, SuccessResponse,
};
