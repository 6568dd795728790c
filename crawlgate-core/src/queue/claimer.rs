use std::sync::Arc;

use async_trait::async_trait;
use crawlgate_model::{ClaimedJob, QueuedJob};
use tracing::{debug, warn};
use uuid::Uuid;

use super::JobQueue;
use crate::error::Result;

/// Decides whether a crawl may start one more job right now.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CrawlConcurrencyChecker: Send + Sync {
    async fn allows(&self, crawl_id: &str, job: &QueuedJob) -> Result<bool>;
}

/// Worker-side pop that honours per-crawl concurrency.
///
/// A denied job is released back to the queue and its crawl is added to the
/// blocked set before trying again, so a pop visits every crawl at most once.
#[derive(Debug, Clone)]
pub struct Claimer {
    queue: Arc<dyn JobQueue>,
}

impl Claimer {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// `<pid>-<uuid v7>`, unique per logical pop.
    pub fn worker_id() -> String {
        format!("{}-{}", std::process::id(), Uuid::now_v7())
    }

    pub async fn pop(
        &self,
        team_id: &str,
        blocked_crawl_ids: &[String],
        checker: Option<&dyn CrawlConcurrencyChecker>,
    ) -> Result<Option<ClaimedJob>> {
        let worker_id = Self::worker_id();
        let mut blocked = blocked_crawl_ids.to_vec();

        loop {
            let Some(claimed) = self.queue.pop(team_id, &worker_id, &blocked).await? else {
                return Ok(None);
            };

            let (Some(checker), Some(crawl_id)) = (checker, claimed.job.crawl_id.clone()) else {
                return Ok(Some(claimed));
            };

            let allowed = match checker.allows(&crawl_id, &claimed.job).await {
                Ok(allowed) => allowed,
                Err(err) => {
                    self.give_back(&claimed).await;
                    return Err(err);
                }
            };
            if allowed {
                return Ok(Some(claimed));
            }

            debug!(
                team_id,
                crawl_id = %crawl_id,
                job_id = %claimed.job.id,
                worker_id = %worker_id,
                "Crawl at concurrency limit, releasing claim"
            );
            self.queue.release(&claimed.job.id).await?;

            if blocked.contains(&crawl_id) {
                return Ok(None);
            }
            blocked.push(crawl_id);
        }
    }

    async fn give_back(&self, claimed: &ClaimedJob) {
        if let Err(err) = self.queue.release(&claimed.job.id).await {
            warn!(
                job_id = %claimed.job.id,
                "Failed to release claim after checker error: {}",
                err
            );
        }
    }
}
