use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use crawlgate_core::config::QueueConfig;
use crawlgate_core::error::GateError;
use crawlgate_core::queue::{Claimer, CrawlConcurrencyChecker, JobQueue, KvQueue};
use crawlgate_core::store::{MemoryStore, QueueStore, Scope};
use crawlgate_core::time::ManualClock;
use crawlgate_model::{CounterKind, JobSubmission, QueuedJob};

/// Refuses every crawl and counts how often it was asked.
#[derive(Default)]
struct CrawlAtLimit {
    asked: AtomicUsize,
}

#[async_trait]
impl CrawlConcurrencyChecker for CrawlAtLimit {
    async fn allows(&self, _crawl_id: &str, _job: &QueuedJob) -> crawlgate_core::Result<bool> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }
}

fn queue_with_clock(clock: Arc<ManualClock>) -> (Arc<MemoryStore>, Arc<KvQueue>) {
    let store = Arc::new(MemoryStore::new());
    let queue = KvQueue::new(store.clone(), QueueConfig::default()).with_clock(clock);
    (store, Arc::new(queue))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pops_claim_each_job_exactly_once() {
    let (_, queue) = queue_with_clock(Arc::new(ManualClock::new(1_000)));
    for n in 0..20 {
        queue
            .push("T", JobSubmission::new(format!("job-{n:02}"), 0), None, None)
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for worker in 0..40 {
        let queue = queue.clone();
        tasks.push(tokio::spawn(async move {
            queue.pop("T", &format!("worker-{worker}"), &[]).await
        }));
    }

    let mut claimed = Vec::new();
    for task in tasks {
        if let Some(job) = task.await.unwrap().unwrap() {
            claimed.push(job.job.id);
        }
    }

    let unique: HashSet<_> = claimed.iter().cloned().collect();
    assert_eq!(claimed.len(), 20, "every job is handed out once: {claimed:?}");
    assert_eq!(unique.len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_racing_pops_for_one_job_yield_one_winner() {
    let (_, queue) = queue_with_clock(Arc::new(ManualClock::new(1_000)));
    queue
        .push("T", JobSubmission::new("only", 0), None, None)
        .await
        .unwrap();

    let (a, b) = tokio::join!(queue.pop("T", "worker-a", &[]), queue.pop("T", "worker-b", &[]));
    let wins = [a.unwrap(), b.unwrap()].into_iter().flatten().count();
    assert_eq!(wins, 1);
}

#[tokio::test]
async fn complete_is_idempotent_and_release_after_complete_is_a_no_op() {
    let (_, queue) = queue_with_clock(Arc::new(ManualClock::new(1_000)));
    queue
        .push("T", JobSubmission::new("j", 0), None, Some("C"))
        .await
        .unwrap();
    assert_eq!(queue.team_queue_count("T").await.unwrap(), 1);
    assert_eq!(queue.crawl_queue_count("C").await.unwrap(), 1);

    let claimed = queue.pop("T", "w", &[]).await.unwrap().unwrap();
    assert!(queue.complete(&claimed.queue_key).await.unwrap());
    assert!(!queue.complete(&claimed.queue_key).await.unwrap());
    assert!(!queue.release("j").await.unwrap());

    assert_eq!(queue.team_queue_count("T").await.unwrap(), 0);
    assert_eq!(queue.crawl_queue_count("C").await.unwrap(), 0);
    assert!(queue.pop("T", "w2", &[]).await.unwrap().is_none());
}

#[tokio::test]
async fn complete_rejects_a_garbled_queue_key() {
    let (_, queue) = queue_with_clock(Arc::new(ManualClock::new(1_000)));
    let err = queue.complete("%%% not a key %%%").await.unwrap_err();
    assert!(matches!(err, GateError::InvalidQueueKey(_)));
}

#[tokio::test]
async fn blocked_crawl_terminates_without_touching_counts() {
    let (_, queue) = queue_with_clock(Arc::new(ManualClock::new(1_000)));
    for n in 0..3 {
        queue
            .push("T", JobSubmission::new(format!("c-{n}"), 0), None, Some("C"))
            .await
            .unwrap();
    }

    let checker = CrawlAtLimit::default();

    let claimer = Claimer::new(queue.clone());
    let claimed = claimer.pop("T", &[], Some(&checker)).await.unwrap();
    assert!(claimed.is_none());
    assert_eq!(checker.asked.load(Ordering::SeqCst), 1);
    assert_eq!(queue.team_queue_count("T").await.unwrap(), 3);
    assert_eq!(queue.crawl_queue_count("C").await.unwrap(), 3);

    // Nothing stayed claimed.
    assert!(queue.pop("T", "w", &[]).await.unwrap().is_some());
}

#[tokio::test]
async fn timed_out_jobs_are_skipped_and_swept() {
    let clock = Arc::new(ManualClock::new(1_000));
    let (store, queue) = queue_with_clock(clock.clone());
    queue
        .push("T", JobSubmission::new("short", 10), Some(500), None)
        .await
        .unwrap();
    queue
        .push("T", JobSubmission::new("long", 0), Some(60_000), None)
        .await
        .unwrap();

    clock.advance(Duration::from_millis(501));
    let claimed = queue.pop("T", "w", &[]).await.unwrap().unwrap();
    assert_eq!(claimed.job.id, "long");
    assert_eq!(queue.team_queue_count("T").await.unwrap(), 1);
    assert_eq!(store.get_counter(CounterKind::TeamQueue, "T").await.unwrap(), 1);

    // The claimed job expires too but is left alone while claimed.
    clock.advance(Duration::from_secs(60));
    assert_eq!(queue.clean_expired_jobs().await.unwrap(), 0);
    assert!(queue.release("long").await.unwrap());
    assert_eq!(queue.clean_expired_jobs().await.unwrap(), 1);
    assert_eq!(queue.team_queue_count("T").await.unwrap(), 0);
}

#[tokio::test]
async fn active_markers_track_team_and_crawl_separately() {
    let clock = Arc::new(ManualClock::new(1_000));
    let (_, queue) = queue_with_clock(clock.clone());

    queue.push_active(Scope::Team, "T", "a", 1_000).await.unwrap();
    queue.push_active(Scope::Team, "T", "b", 10_000).await.unwrap();
    queue.push_active(Scope::Crawl, "C", "a", 1_000).await.unwrap();
    assert_eq!(queue.active_count(Scope::Team, "T").await.unwrap(), 2);
    assert_eq!(queue.active_count(Scope::Crawl, "C").await.unwrap(), 1);

    clock.advance(Duration::from_millis(1_001));
    assert_eq!(queue.active_jobs(Scope::Team, "T").await.unwrap(), vec!["b"]);
    assert_eq!(queue.clean_expired_active_jobs().await.unwrap(), 2);
    assert_eq!(queue.active_count(Scope::Team, "T").await.unwrap(), 1);
    assert_eq!(queue.active_count(Scope::Crawl, "C").await.unwrap(), 0);

    queue.remove_active(Scope::Team, "T", "b").await.unwrap();
    queue.remove_active(Scope::Team, "T", "b").await.unwrap();
    assert_eq!(queue.active_count(Scope::Team, "T").await.unwrap(), 0);
}
