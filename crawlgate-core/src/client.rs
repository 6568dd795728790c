//! Remote [`JobQueue`] over the crawlgate HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use crawlgate_model::{
    ActiveJobRequest, ClaimedJob, CleanupResponse, CompleteJobRequest, CountResponse, CounterKind,
    JobIdsResponse, JobSubmission, PopJobRequest, PopJobResponse, PushJobRequest,
    ReconcileResponse, ReleaseJobRequest, RenewClaimRequest, SampleResponse, SuccessResponse,
};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::config::BreakerConfig;
use crate::error::{GateError, Result};
use crate::queue::JobQueue;
use crate::store::Scope;

#[derive(Debug)]
pub struct HttpQueueClient {
    http: Client,
    base_url: Url,
    breaker: CircuitBreaker,
}

fn scope_segment(scope: Scope) -> &'static str {
    match scope {
        Scope::Team => "teams",
        Scope::Crawl => "crawls",
    }
}

fn reconcile_segments(kind: CounterKind) -> (&'static str, &'static str) {
    match kind {
        CounterKind::TeamQueue => ("teams", "queue"),
        CounterKind::CrawlQueue => ("crawls", "queue"),
        CounterKind::TeamActive => ("teams", "active"),
        CounterKind::CrawlActive => ("crawls", "active"),
    }
}

impl HttpQueueClient {
    pub fn new(base_url: &str, config: &BreakerConfig) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| GateError::Transport(format!("invalid base url {base_url}: {e}")))?;
        let http = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            http,
            base_url,
            breaker: CircuitBreaker::new("queue-service", config),
        })
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GateError::Transport(format!("{} cannot be a base url", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        Ok(self.http.request(method, self.url(segments)?))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.breaker
            .call(async {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    let message = error_message(response).await;
                    return Err(GateError::Remote {
                        status: status.as_u16(),
                        message,
                    });
                }
                Ok(response.json::<T>().await?)
            })
            .await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T> {
        self.send(self.request(Method::POST, segments)?.json(body))
            .await
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        self.send(self.request(Method::GET, segments)?).await
    }
}

/// Pull `error.message` out of an API error body, falling back to the raw
/// text.
async fn error_message(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|body| {
            body.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or(text)
}

#[async_trait]
impl JobQueue for HttpQueueClient {
    async fn push(
        &self,
        team_id: &str,
        job: JobSubmission,
        timeout_ms: Option<i64>,
        crawl_id: Option<&str>,
    ) -> Result<()> {
        let body = PushJobRequest {
            team_id: team_id.to_string(),
            job,
            timeout: timeout_ms,
            crawl_id: crawl_id.map(str::to_string),
        };
        let _: SuccessResponse = self.post(&["v1", "queue", "push"], &body).await?;
        Ok(())
    }

    async fn pop(
        &self,
        team_id: &str,
        worker_id: &str,
        blocked_crawl_ids: &[String],
    ) -> Result<Option<ClaimedJob>> {
        let body = PopJobRequest {
            worker_id: worker_id.to_string(),
            blocked_crawl_ids: blocked_crawl_ids.to_vec(),
        };
        let claimed: PopJobResponse = self
            .post(&["v1", "queue", "teams", team_id, "pop"], &body)
            .await?;
        Ok(claimed)
    }

    async fn complete(&self, queue_key: &str) -> Result<bool> {
        let body = CompleteJobRequest {
            queue_key: queue_key.to_string(),
        };
        match self
            .post::<_, SuccessResponse>(&["v1", "queue", "complete"], &body)
            .await
        {
            Ok(response) => Ok(response.success),
            Err(GateError::Remote { status: 400, message }) => {
                Err(GateError::InvalidQueueKey(message))
            }
            Err(err) => Err(err),
        }
    }

    async fn release(&self, job_id: &str) -> Result<bool> {
        let body = ReleaseJobRequest {
            job_id: job_id.to_string(),
        };
        let response: SuccessResponse = self.post(&["v1", "queue", "release"], &body).await?;
        Ok(response.success)
    }

    async fn renew_claim(&self, job_id: &str, worker_id: &str) -> Result<bool> {
        let body = RenewClaimRequest {
            job_id: job_id.to_string(),
            worker_id: worker_id.to_string(),
        };
        let response: SuccessResponse = self.post(&["v1", "queue", "renew"], &body).await?;
        Ok(response.success)
    }

    async fn team_queue_count(&self, team_id: &str) -> Result<i64> {
        let response: CountResponse = self.get(&["v1", "queue", "teams", team_id, "count"]).await?;
        Ok(response.count)
    }

    async fn crawl_queue_count(&self, crawl_id: &str) -> Result<i64> {
        let response: CountResponse = self
            .get(&["v1", "queue", "crawls", crawl_id, "count"])
            .await?;
        Ok(response.count)
    }

    async fn team_queued_job_ids(&self, team_id: &str, limit: u32) -> Result<Vec<String>> {
        let request = self
            .request(Method::GET, &["v1", "queue", "teams", team_id, "jobs"])?
            .query(&[("limit", limit)]);
        let response: JobIdsResponse = self.send(request).await?;
        Ok(response.job_ids)
    }

    async fn push_active(
        &self,
        scope: Scope,
        owner: &str,
        job_id: &str,
        timeout_ms: i64,
    ) -> Result<()> {
        let body = ActiveJobRequest {
            job_id: job_id.to_string(),
            timeout: Some(timeout_ms),
        };
        let _: SuccessResponse = self
            .post(&["v1", "queue", scope_segment(scope), owner, "active"], &body)
            .await?;
        Ok(())
    }

    async fn remove_active(&self, scope: Scope, owner: &str, job_id: &str) -> Result<()> {
        let body = ActiveJobRequest {
            job_id: job_id.to_string(),
            timeout: None,
        };
        let _: SuccessResponse = self
            .post(
                &["v1", "queue", scope_segment(scope), owner, "active", "remove"],
                &body,
            )
            .await?;
        Ok(())
    }

    async fn active_count(&self, scope: Scope, owner: &str) -> Result<i64> {
        let response: CountResponse = self
            .get(&["v1", "queue", scope_segment(scope), owner, "active", "count"])
            .await?;
        Ok(response.count)
    }

    async fn active_jobs(&self, scope: Scope, owner: &str) -> Result<Vec<String>> {
        let response: JobIdsResponse = self
            .get(&["v1", "queue", scope_segment(scope), owner, "active"])
            .await?;
        Ok(response.job_ids)
    }

    async fn clean_expired_jobs(&self) -> Result<i64> {
        let response: CleanupResponse = self
            .post(&["v1", "queue", "cleanup", "expired-jobs"], &())
            .await?;
        Ok(response.cleaned)
    }

    async fn clean_expired_active_jobs(&self) -> Result<i64> {
        let response: CleanupResponse = self
            .post(&["v1", "queue", "cleanup", "expired-active"], &())
            .await?;
        Ok(response.cleaned)
    }

    async fn clean_orphaned_claims(&self) -> Result<i64> {
        let response: CleanupResponse = self
            .post(&["v1", "queue", "cleanup", "orphaned-claims"], &())
            .await?;
        Ok(response.cleaned)
    }

    async fn clean_stale_counters(&self) -> Result<i64> {
        let response: CleanupResponse = self
            .post(&["v1", "queue", "cleanup", "stale-counters"], &())
            .await?;
        Ok(response.cleaned)
    }

    async fn reconcile(&self, kind: CounterKind, id: &str) -> Result<i64> {
        let (scope, counter) = reconcile_segments(kind);
        let response: ReconcileResponse = self
            .post(&["v1", "queue", scope, id, "reconcile", counter], &())
            .await?;
        Ok(response.correction)
    }

    async fn sample(&self, scope: Scope, limit: u32, after: Option<&str>) -> Result<Vec<String>> {
        let mut request = self
            .request(Method::GET, &["v1", "queue", "sample", scope_segment(scope)])?
            .query(&[("limit", limit)]);
        if let Some(after) = after {
            request = request.query(&[("after", after)]);
        }
        let response: SampleResponse = self.send(request).await?;
        Ok(response.ids)
    }

    async fn ping(&self) -> Result<()> {
        let request = self.request(Method::GET, &["health"])?;
        self.breaker
            .call(async {
                let response = request.send().await?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(GateError::Unavailable(format!(
                        "queue service health returned {}",
                        response.status()
                    )))
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_percent_encoded_into_single_segments() {
        let client =
            HttpQueueClient::new("http://127.0.0.1:9/", &BreakerConfig::default()).unwrap();
        let url = client
            .url(&["v1", "queue", "teams", "team/with space", "count"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9/v1/queue/teams/team%2Fwith%20space/count"
        );
    }

    #[tokio::test]
    async fn unreachable_service_trips_the_breaker() {
        let config = BreakerConfig {
            failure_threshold: 2,
            open_duration_ms: 60_000,
            request_timeout_ms: 500,
        };
        // Port 9 (discard) is closed on test hosts, connections are refused.
        let client = HttpQueueClient::new("http://127.0.0.1:9", &config).unwrap();

        for _ in 0..2 {
            let err = client.team_queue_count("T").await.unwrap_err();
            assert!(matches!(err, GateError::Transport(_)));
        }
        assert_eq!(client.breaker_state(), BreakerState::Open);

        let err = client.team_queue_count("T").await.unwrap_err();
        assert!(matches!(err, GateError::Unavailable(_)));
    }
}
