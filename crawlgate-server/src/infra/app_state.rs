use std::{fmt, sync::Arc};

use anyhow::Context;
use crawlgate_core::{
    janitor::Janitor,
    metrics::GuardStats,
    queue::{JobQueue, KvQueue},
    semaphore::TeamSemaphore,
    store::{LeaseStore, MemoryStore, QueueStore, RedisStore},
};
use tracing::info;

use crate::infra::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn JobQueue>,
    pub semaphore: Arc<TeamSemaphore>,
    pub janitor: Arc<Janitor>,
    /// Admission metrics of the lease endpoints, drained by the health reporter.
    pub stats: Arc<GuardStats>,
    pub config: Arc<Config>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    /// Connect to the configured store, falling back to process memory when no
    /// Redis URL is set.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let Some(redis_url) = config.store.redis_url.clone() else {
            info!("Using in-memory store");
            return Ok(Self::in_memory(config));
        };

        let store = Arc::new(
            RedisStore::connect(&redis_url, config.store.key_prefix.clone())
                .await
                .context("failed to connect to Redis")?,
        );
        info!(prefix = %config.store.key_prefix, "Connected to Redis store");
        Ok(Self::assemble(config, store.clone(), store))
    }

    pub fn in_memory(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::assemble(config, store.clone(), store)
    }

    fn assemble(
        config: Config,
        leases: Arc<dyn LeaseStore>,
        queue_store: Arc<dyn QueueStore>,
    ) -> Self {
        let gate = &config.gate;
        let queue: Arc<dyn JobQueue> = Arc::new(
            KvQueue::new(queue_store, gate.queue.clone()).with_sweep_config(gate.janitor.clone()),
        );
        let semaphore = Arc::new(TeamSemaphore::new(leases, gate.semaphore.clone()));
        let janitor = Arc::new(Janitor::new(queue.clone(), gate.janitor.clone()));

        Self {
            queue,
            semaphore,
            janitor,
            stats: Arc::new(GuardStats::new()),
            config: Arc::new(config),
        }
    }
}
