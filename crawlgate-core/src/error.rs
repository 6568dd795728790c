use std::time::Duration;

use crawlgate_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateError {
    /// The blocking acquire ran out of time before a lease was granted.
    #[error("could not admit team {team_id} within {waited:?}")]
    AdmissionTimeout { team_id: String, waited: Duration },

    /// The caller's own cancellation fired before a lease was granted.
    #[error("admission for team {team_id} was aborted by the caller")]
    AdmissionAborted { team_id: String },

    /// A granted lease could not be renewed.
    #[error("lease for holder {holder_id} of team {team_id} was lost")]
    HeartbeatLost { team_id: String, holder_id: String },

    /// The backing store or queue service is failing fast.
    #[error("dependency unavailable: {0}")]
    Unavailable(String),

    #[error("Store error: {0}")]
    Store(String),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid queue key: {0}")]
    InvalidQueueKey(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },
}

impl GateError {
    /// Timeout and abort are the two outcomes of a failed admission.
    pub fn is_admission_error(&self) -> bool {
        matches!(
            self,
            GateError::AdmissionTimeout { .. } | GateError::AdmissionAborted { .. }
        )
    }

    /// Conditions a caller may retry later with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            GateError::AdmissionTimeout { .. }
            | GateError::Unavailable(_)
            | GateError::Transport(_) => true,
            GateError::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<ModelError> for GateError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::InvalidQueueKey(msg) => GateError::InvalidQueueKey(msg),
        }
    }
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        GateError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GateError>;
