mod common;

use axum::http::StatusCode;
use crawlgate_model::{
    ClaimedJob, CleanupResponse, CountResponse, JobIdsResponse, ReconcileResponse,
    SampleResponse, SuccessResponse,
};
use serde_json::{Value, json};

use common::test_server;

#[tokio::test]
async fn push_pop_complete_round() {
    let (server, _) = test_server();

    for (id, priority) in [("low", 10), ("high", 1)] {
        server
            .post("/v1/queue/push")
            .json(&json!({
                "teamId": "T",
                "job": { "id": id, "priority": priority, "data": { "url": "https://example.com" } },
                "crawlId": "C"
            }))
            .await
            .assert_status_ok();
    }

    let count: CountResponse = server.get("/v1/queue/teams/T/count").await.json();
    assert_eq!(count.count, 2);
    let count: CountResponse = server.get("/v1/queue/crawls/C/count").await.json();
    assert_eq!(count.count, 2);

    let ids: JobIdsResponse = server
        .get("/v1/queue/teams/T/jobs")
        .add_query_param("limit", 1)
        .await
        .json();
    assert_eq!(ids.job_ids, vec!["high"]);

    let claimed: Option<ClaimedJob> = server
        .post("/v1/queue/teams/T/pop")
        .json(&json!({ "workerId": "w1" }))
        .await
        .json();
    let claimed = claimed.expect("a job is claimed");
    assert_eq!(claimed.job.id, "high");
    assert_eq!(claimed.job.data["url"], "https://example.com");

    // The only other job belongs to a blocked crawl.
    let none: Option<ClaimedJob> = server
        .post("/v1/queue/teams/T/pop")
        .json(&json!({ "workerId": "w2", "blockedCrawlIds": ["C"] }))
        .await
        .json();
    assert!(none.is_none());

    let done: SuccessResponse = server
        .post("/v1/queue/complete")
        .json(&json!({ "queueKey": claimed.queue_key }))
        .await
        .json();
    assert!(done.success);
    let again: SuccessResponse = server
        .post("/v1/queue/complete")
        .json(&json!({ "queueKey": claimed.queue_key }))
        .await
        .json();
    assert!(!again.success);

    let count: CountResponse = server.get("/v1/queue/teams/T/count").await.json();
    assert_eq!(count.count, 1);
}

#[tokio::test]
async fn malformed_queue_key_is_a_client_error() {
    let (server, _) = test_server();

    let response = server
        .post("/v1/queue/complete")
        .json(&json!({ "queueKey": "%%%" }))
        .expect_failure()
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["status"], 400);
}

#[tokio::test]
async fn release_returns_job_to_the_queue() {
    let (server, _) = test_server();
    server
        .post("/v1/queue/push")
        .json(&json!({ "teamId": "T", "job": { "id": "j" } }))
        .await
        .assert_status_ok();

    let first: Option<ClaimedJob> = server
        .post("/v1/queue/teams/T/pop")
        .json(&json!({ "workerId": "w1" }))
        .await
        .json();
    assert_eq!(first.map(|c| c.worker_id).as_deref(), Some("w1"));

    let renewed: SuccessResponse = server
        .post("/v1/queue/renew")
        .json(&json!({ "jobId": "j", "workerId": "w1" }))
        .await
        .json();
    assert!(renewed.success);
    let foreign: SuccessResponse = server
        .post("/v1/queue/renew")
        .json(&json!({ "jobId": "j", "workerId": "w2" }))
        .await
        .json();
    assert!(!foreign.success);
    server
        .post("/v1/queue/renew")
        .json(&json!({ "jobId": "j", "workerId": "" }))
        .expect_failure()
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let released: SuccessResponse = server
        .post("/v1/queue/release")
        .json(&json!({ "jobId": "j" }))
        .await
        .json();
    assert!(released.success);

    let second: Option<ClaimedJob> = server
        .post("/v1/queue/teams/T/pop")
        .json(&json!({ "workerId": "w2" }))
        .await
        .json();
    assert_eq!(second.map(|c| c.job.id).as_deref(), Some("j"));
}

#[tokio::test]
async fn active_markers_for_teams_and_crawls() {
    let (server, _) = test_server();

    for path in ["/v1/queue/teams/T/active", "/v1/queue/crawls/C/active"] {
        server
            .post(path)
            .json(&json!({ "jobId": "a", "timeout": 60_000 }))
            .await
            .assert_status_ok();
    }

    let count: CountResponse = server.get("/v1/queue/teams/T/active/count").await.json();
    assert_eq!(count.count, 1);
    let jobs: JobIdsResponse = server.get("/v1/queue/crawls/C/active").await.json();
    assert_eq!(jobs.job_ids, vec!["a"]);

    server
        .post("/v1/queue/teams/T/active/remove")
        .json(&json!({ "jobId": "a" }))
        .await
        .assert_status_ok();
    let count: CountResponse = server.get("/v1/queue/teams/T/active/count").await.json();
    assert_eq!(count.count, 0);

    server
        .post("/v1/queue/teams/T/active")
        .json(&json!({ "jobId": "b" }))
        .expect_failure()
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn maintenance_endpoints_report_their_work() {
    let (server, state) = test_server();
    server
        .post("/v1/queue/push")
        .json(&json!({ "teamId": "T", "job": { "id": "j" } }))
        .await
        .assert_status_ok();

    for path in [
        "/v1/queue/cleanup/expired-jobs",
        "/v1/queue/cleanup/expired-active",
        "/v1/queue/cleanup/orphaned-claims",
        "/v1/queue/cleanup/stale-counters",
    ] {
        let cleaned: CleanupResponse = server.post(path).await.json();
        assert_eq!(cleaned.cleaned, 0, "{path}");
    }

    let reconciled: ReconcileResponse = server.post("/v1/queue/teams/T/reconcile/queue").await.json();
    assert_eq!(reconciled.correction, 0);
    let reconciled: ReconcileResponse =
        server.post("/v1/queue/crawls/nope/reconcile/active").await.json();
    assert_eq!(reconciled.correction, 0);

    let sample: SampleResponse = server.get("/v1/queue/sample/teams").await.json();
    assert_eq!(sample.ids, vec!["T"]);
    let sample: SampleResponse = server
        .get("/v1/queue/sample/teams")
        .add_query_param("after", "T")
        .await
        .json();
    assert!(sample.ids.is_empty());

    let report = state.janitor.run_once().await;
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn health_is_ok_with_reachable_stores() {
    let (server, _) = test_server();
    let body: Value = server.get("/health").await.json();
    assert_eq!(body["status"], "ok");
}
