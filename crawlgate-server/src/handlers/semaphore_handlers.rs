//! Handlers for `/v1/semaphore/{team_id}/...`.

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, State},
};
use crawlgate_core::{
    error::GateError,
    metrics::{MetricsSink, StatsSnapshot, names},
};
use crawlgate_model::{
    AcquireLeaseRequest, AcquireLeaseResponse, HeartbeatLeaseRequest, HeartbeatLeaseResponse,
    LeaseCountResponse, ReleaseLeaseRequest, SuccessResponse,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    AppState,
    infra::errors::{AppError, AppResult},
};

fn require_holder(holder_id: &str) -> AppResult<()> {
    if holder_id.is_empty() {
        return Err(AppError::bad_request("holderId must not be empty"));
    }
    Ok(())
}

/// One acquire attempt, or a blocking acquire when `waitMs` is set.
pub async fn acquire_lease(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
    Json(request): Json<AcquireLeaseRequest>,
) -> AppResult<Json<AcquireLeaseResponse>> {
    require_holder(&request.holder_id)?;

    let Some(wait_ms) = request.wait_ms else {
        let outcome = state
            .semaphore
            .acquire(&team_id, &request.holder_id, request.limit)
            .await?;
        if outcome.granted {
            state.stats.counter(names::ACQUIRE_GRANTED, 1);
        }
        return Ok(Json(AcquireLeaseResponse {
            granted: outcome.granted,
            count: outcome.count,
            removed: outcome.removed,
            limited: !outcome.granted,
        }));
    };

    let mut options = state.semaphore.config().backoff();
    options.timeout = Duration::from_millis(wait_ms);

    // Dropping the request future (client disconnect) stops the wait.
    let started = Instant::now();
    let grant = state
        .semaphore
        .acquire_blocking(
            &team_id,
            &request.holder_id,
            request.limit,
            &options,
            &CancellationToken::new(),
        )
        .await
        .inspect_err(|err| {
            if matches!(err, GateError::AdmissionTimeout { .. }) {
                state.stats.counter(names::ACQUIRE_TIMEOUT, 1);
            }
        })?;

    state.stats.counter(names::ACQUIRE_GRANTED, 1);
    if grant.limited {
        state.stats.counter(names::ACQUIRE_RETRIED, 1);
    }
    state
        .stats
        .histogram(names::ACQUIRE_MS, started.elapsed().as_secs_f64() * 1_000.0);

    let count = state.semaphore.count(&team_id).await?;
    Ok(Json(AcquireLeaseResponse {
        granted: true,
        count,
        removed: grant.removed,
        limited: grant.limited,
    }))
}

pub async fn heartbeat_lease(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
    Json(request): Json<HeartbeatLeaseRequest>,
) -> AppResult<Json<HeartbeatLeaseResponse>> {
    require_holder(&request.holder_id)?;

    let ttl = request.ttl_ms.map(Duration::from_millis);
    let granted = state
        .semaphore
        .heartbeat(&team_id, &request.holder_id, ttl)
        .await?;
    if !granted {
        state.stats.counter(names::HEARTBEAT_LOST, 1);
    }
    Ok(Json(HeartbeatLeaseResponse { granted }))
}

pub async fn release_lease(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
    Json(request): Json<ReleaseLeaseRequest>,
) -> AppResult<Json<SuccessResponse>> {
    require_holder(&request.holder_id)?;

    state
        .semaphore
        .release(&team_id, &request.holder_id)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn lease_count(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
) -> AppResult<Json<LeaseCountResponse>> {
    let count = state.semaphore.count(&team_id).await?;
    Ok(Json(LeaseCountResponse { count }))
}

/// Admission counters accumulated since the last health report.
pub async fn admission_stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}
