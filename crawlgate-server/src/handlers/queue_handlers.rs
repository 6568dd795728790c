//! Handlers for `/v1/queue/...`.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use crawlgate_core::store::Scope;
use crawlgate_model::{
    ActiveJobRequest, CleanupResponse, CompleteJobRequest, CountResponse, CounterKind,
    JobIdsResponse, PopJobRequest, PopJobResponse, PushJobRequest, QueuedJobIdsQuery,
    ReconcileResponse, ReleaseJobRequest, RenewClaimRequest, SampleQuery, SampleResponse,
    SuccessResponse,
};

use crate::{
    AppState,
    infra::errors::{AppError, AppResult},
};

fn require(field: &str, value: &str) -> AppResult<()> {
    if value.is_empty() {
        return Err(AppError::bad_request(format!("{field} must not be empty")));
    }
    Ok(())
}

pub async fn push_job(
    State(state): State<AppState>,
    Json(request): Json<PushJobRequest>,
) -> AppResult<Json<SuccessResponse>> {
    require("teamId", &request.team_id)?;
    require("job.id", &request.job.id)?;

    state
        .queue
        .push(
            &request.team_id,
            request.job,
            request.timeout,
            request.crawl_id.as_deref(),
        )
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn pop_job(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
    Json(request): Json<PopJobRequest>,
) -> AppResult<Json<PopJobResponse>> {
    require("workerId", &request.worker_id)?;

    let claimed = state
        .queue
        .pop(&team_id, &request.worker_id, &request.blocked_crawl_ids)
        .await?;
    Ok(Json(claimed))
}

pub async fn complete_job(
    State(state): State<AppState>,
    Json(request): Json<CompleteJobRequest>,
) -> AppResult<Json<SuccessResponse>> {
    let success = state.queue.complete(&request.queue_key).await?;
    Ok(Json(SuccessResponse { success }))
}

pub async fn release_job(
    State(state): State<AppState>,
    Json(request): Json<ReleaseJobRequest>,
) -> AppResult<Json<SuccessResponse>> {
    let success = state.queue.release(&request.job_id).await?;
    Ok(Json(SuccessResponse { success }))
}

pub async fn renew_claim(
    State(state): State<AppState>,
    Json(request): Json<RenewClaimRequest>,
) -> AppResult<Json<SuccessResponse>> {
    require("jobId", &request.job_id)?;
    require("workerId", &request.worker_id)?;

    let success = state
        .queue
        .renew_claim(&request.job_id, &request.worker_id)
        .await?;
    Ok(Json(SuccessResponse { success }))
}

pub async fn team_queue_count(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
) -> AppResult<Json<CountResponse>> {
    let count = state.queue.team_queue_count(&team_id).await?;
    Ok(Json(CountResponse { count }))
}

pub async fn crawl_queue_count(
    State(state): State<AppState>,
    Path(crawl_id): Path<String>,
) -> AppResult<Json<CountResponse>> {
    let count = state.queue.crawl_queue_count(&crawl_id).await?;
    Ok(Json(CountResponse { count }))
}

pub async fn team_queued_job_ids(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
    Query(query): Query<QueuedJobIdsQuery>,
) -> AppResult<Json<JobIdsResponse>> {
    let limit = query
        .limit
        .unwrap_or(state.config.gate.queue.max_queued_ids);
    let job_ids = state.queue.team_queued_job_ids(&team_id, limit).await?;
    Ok(Json(JobIdsResponse { job_ids }))
}

async fn push_active(
    state: AppState,
    scope: Scope,
    owner: String,
    request: ActiveJobRequest,
) -> AppResult<Json<SuccessResponse>> {
    require("jobId", &request.job_id)?;
    let timeout = request
        .timeout
        .filter(|timeout| *timeout > 0)
        .ok_or_else(|| AppError::bad_request("timeout must be a positive number of ms"))?;

    state
        .queue
        .push_active(scope, &owner, &request.job_id, timeout)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn remove_active(
    state: AppState,
    scope: Scope,
    owner: String,
    request: ActiveJobRequest,
) -> AppResult<Json<SuccessResponse>> {
    state
        .queue
        .remove_active(scope, &owner, &request.job_id)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn active_count(
    state: AppState,
    scope: Scope,
    owner: String,
) -> AppResult<Json<CountResponse>> {
    let count = state.queue.active_count(scope, &owner).await?;
    Ok(Json(CountResponse { count }))
}

async fn active_jobs(
    state: AppState,
    scope: Scope,
    owner: String,
) -> AppResult<Json<JobIdsResponse>> {
    let job_ids = state.queue.active_jobs(scope, &owner).await?;
    Ok(Json(JobIdsResponse { job_ids }))
}

pub async fn push_team_active(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
    Json(request): Json<ActiveJobRequest>,
) -> AppResult<Json<SuccessResponse>> {
    push_active(state, Scope::Team, team_id, request).await
}

pub async fn remove_team_active(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
    Json(request): Json<ActiveJobRequest>,
) -> AppResult<Json<SuccessResponse>> {
    remove_active(state, Scope::Team, team_id, request).await
}

pub async fn team_active_count(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
) -> AppResult<Json<CountResponse>> {
    active_count(state, Scope::Team, team_id).await
}

pub async fn team_active_jobs(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
) -> AppResult<Json<JobIdsResponse>> {
    active_jobs(state, Scope::Team, team_id).await
}

pub async fn push_crawl_active(
    State(state): State<AppState>,
    Path(crawl_id): Path<String>,
    Json(request): Json<ActiveJobRequest>,
) -> AppResult<Json<SuccessResponse>> {
    push_active(state, Scope::Crawl, crawl_id, request).await
}

pub async fn remove_crawl_active(
    State(state): State<AppState>,
    Path(crawl_id): Path<String>,
    Json(request): Json<ActiveJobRequest>,
) -> AppResult<Json<SuccessResponse>> {
    remove_active(state, Scope::Crawl, crawl_id, request).await
}

pub async fn crawl_active_count(
    State(state): State<AppState>,
    Path(crawl_id): Path<String>,
) -> AppResult<Json<CountResponse>> {
    active_count(state, Scope::Crawl, crawl_id).await
}

pub async fn crawl_active_jobs(
    State(state): State<AppState>,
    Path(crawl_id): Path<String>,
) -> AppResult<Json<JobIdsResponse>> {
    active_jobs(state, Scope::Crawl, crawl_id).await
}

pub async fn clean_expired_jobs(State(state): State<AppState>) -> AppResult<Json<CleanupResponse>> {
    let cleaned = state.queue.clean_expired_jobs().await?;
    Ok(Json(CleanupResponse { cleaned }))
}

pub async fn clean_expired_active_jobs(
    State(state): State<AppState>,
) -> AppResult<Json<CleanupResponse>> {
    let cleaned = state.queue.clean_expired_active_jobs().await?;
    Ok(Json(CleanupResponse { cleaned }))
}

pub async fn clean_orphaned_claims(
    State(state): State<AppState>,
) -> AppResult<Json<CleanupResponse>> {
    let cleaned = state.queue.clean_orphaned_claims().await?;
    Ok(Json(CleanupResponse { cleaned }))
}

pub async fn clean_stale_counters(
    State(state): State<AppState>,
) -> AppResult<Json<CleanupResponse>> {
    let cleaned = state.queue.clean_stale_counters().await?;
    Ok(Json(CleanupResponse { cleaned }))
}

async fn reconcile(
    state: AppState,
    kind: CounterKind,
    id: String,
) -> AppResult<Json<ReconcileResponse>> {
    let correction = state.queue.reconcile(kind, &id).await?;
    Ok(Json(ReconcileResponse { correction }))
}

pub async fn reconcile_team_queue(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
) -> AppResult<Json<ReconcileResponse>> {
    reconcile(state, CounterKind::TeamQueue, team_id).await
}

pub async fn reconcile_team_active(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
) -> AppResult<Json<ReconcileResponse>> {
    reconcile(state, CounterKind::TeamActive, team_id).await
}

pub async fn reconcile_crawl_queue(
    State(state): State<AppState>,
    Path(crawl_id): Path<String>,
) -> AppResult<Json<ReconcileResponse>> {
    reconcile(state, CounterKind::CrawlQueue, crawl_id).await
}

pub async fn reconcile_crawl_active(
    State(state): State<AppState>,
    Path(crawl_id): Path<String>,
) -> AppResult<Json<ReconcileResponse>> {
    reconcile(state, CounterKind::CrawlActive, crawl_id).await
}

async fn sample(
    state: AppState,
    scope: Scope,
    query: SampleQuery,
) -> AppResult<Json<SampleResponse>> {
    let limit = query
        .limit
        .unwrap_or(state.config.gate.janitor.sample_batch);
    let ids = state
        .queue
        .sample(scope, limit, query.after.as_deref())
        .await?;
    Ok(Json(SampleResponse { ids }))
}

pub async fn sample_teams(
    State(state): State<AppState>,
    Query(query): Query<SampleQuery>,
) -> AppResult<Json<SampleResponse>> {
    sample(state, Scope::Team, query).await
}

pub async fn sample_crawls(
    State(state): State<AppState>,
    Query(query): Query<SampleQuery>,
) -> AppResult<Json<SampleResponse>> {
    sample(state, Scope::Crawl, query).await
}
