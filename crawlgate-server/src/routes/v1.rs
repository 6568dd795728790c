use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    AppState,
    handlers::{queue_handlers as queue, semaphore_handlers as semaphore},
};

/// Create all v1 API routes
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .nest("/queue", create_queue_routes())
        .nest("/semaphore", create_semaphore_routes())
}

fn create_queue_routes() -> Router<AppState> {
    Router::new()
        .route("/push", post(queue::push_job))
        .route("/complete", post(queue::complete_job))
        .route("/release", post(queue::release_job))
        .route("/renew", post(queue::renew_claim))
        // Team scope
        .route("/teams/{team_id}/pop", post(queue::pop_job))
        .route("/teams/{team_id}/count", get(queue::team_queue_count))
        .route("/teams/{team_id}/jobs", get(queue::team_queued_job_ids))
        .route(
            "/teams/{team_id}/active",
            get(queue::team_active_jobs).post(queue::push_team_active),
        )
        .route(
            "/teams/{team_id}/active/remove",
            post(queue::remove_team_active),
        )
        .route(
            "/teams/{team_id}/active/count",
            get(queue::team_active_count),
        )
        .route(
            "/teams/{team_id}/reconcile/queue",
            post(queue::reconcile_team_queue),
        )
        .route(
            "/teams/{team_id}/reconcile/active",
            post(queue::reconcile_team_active),
        )
        // Crawl scope
        .route("/crawls/{crawl_id}/count", get(queue::crawl_queue_count))
        .route(
            "/crawls/{crawl_id}/active",
            get(queue::crawl_active_jobs).post(queue::push_crawl_active),
        )
        .route(
            "/crawls/{crawl_id}/active/remove",
            post(queue::remove_crawl_active),
        )
        .route(
            "/crawls/{crawl_id}/active/count",
            get(queue::crawl_active_count),
        )
        .route(
            "/crawls/{crawl_id}/reconcile/queue",
            post(queue::reconcile_crawl_queue),
        )
        .route(
            "/crawls/{crawl_id}/reconcile/active",
            post(queue::reconcile_crawl_active),
        )
        // Maintenance
        .route("/cleanup/expired-jobs", post(queue::clean_expired_jobs))
        .route(
            "/cleanup/expired-active",
            post(queue::clean_expired_active_jobs),
        )
        .route(
            "/cleanup/orphaned-claims",
            post(queue::clean_orphaned_claims),
        )
        .route("/cleanup/stale-counters", post(queue::clean_stale_counters))
        .route("/sample/teams", get(queue::sample_teams))
        .route("/sample/crawls", get(queue::sample_crawls))
}

fn create_semaphore_routes() -> Router<AppState> {
    Router::new()
        .route("/{team_id}/acquire", post(semaphore::acquire_lease))
        .route("/{team_id}/heartbeat", post(semaphore::heartbeat_lease))
        .route("/{team_id}/release", post(semaphore::release_lease))
        .route("/{team_id}/count", get(semaphore::lease_count))
}
