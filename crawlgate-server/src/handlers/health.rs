use axum::{Json, extract::State};
use serde_json::{Value, json};
use tracing::warn;

use crate::{
    AppState,
    infra::errors::{AppError, AppResult},
};

/// 200 when both the lease store and the queue store answer a ping.
pub async fn health(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let (leases, queue) = tokio::join!(state.semaphore.ping(), state.queue.ping());

    if let Err(err) = leases.and(queue) {
        warn!("Health check failed: {}", err);
        return Err(AppError::unavailable(format!("store unreachable: {err}")));
    }

    Ok(Json(json!({ "status": "ok" })))
}
