use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crawlgate_core::error::GateError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        let status = match &err {
            GateError::AdmissionTimeout { .. } | GateError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GateError::AdmissionAborted { .. } => StatusCode::REQUEST_TIMEOUT,
            GateError::HeartbeatLost { .. } => StatusCode::CONFLICT,
            GateError::InvalidQueueKey(_) => StatusCode::BAD_REQUEST,
            _ => {
                tracing::error!(error = %err, "queue operation failed");
                return Self::internal("Queue operation failed");
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn admission_outcomes_map_to_distinct_statuses() {
        let timeout: AppError = GateError::AdmissionTimeout {
            team_id: "t".into(),
            waited: Duration::from_secs(1),
        }
        .into();
        let aborted: AppError = GateError::AdmissionAborted { team_id: "t".into() }.into();
        let lost: AppError = GateError::HeartbeatLost {
            team_id: "t".into(),
            holder_id: "h".into(),
        }
        .into();

        assert_eq!(timeout.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(aborted.status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(lost.status, StatusCode::CONFLICT);
    }

    #[test]
    fn store_failures_hide_internals() {
        let err: AppError = GateError::Store("connection reset by 10.0.0.3".into()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("10.0.0.3"));
    }
}
