use std::sync::Arc;
use std::time::Duration;

use crawlgate_core::config::{JanitorConfig, QueueConfig};
use crawlgate_core::janitor::Janitor;
use crawlgate_core::queue::{JobQueue, KvQueue};
use crawlgate_core::store::{ClaimRecord, MemoryStore, QueueStore, Scope};
use crawlgate_core::time::ManualClock;
use crawlgate_model::{CounterKind, JobSubmission};

struct Fixture {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    queue: Arc<KvQueue>,
    janitor: Janitor,
}

fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let store = Arc::new(MemoryStore::new());
    let sweep = JanitorConfig {
        page_size: 2,
        sample_batch: 10,
        ..JanitorConfig::default()
    };
    let queue = Arc::new(
        KvQueue::new(store.clone(), QueueConfig::default())
            .with_clock(clock.clone())
            .with_sweep_config(sweep.clone()),
    );
    let janitor = Janitor::new(queue.clone(), sweep);
    Fixture {
        clock,
        store,
        queue,
        janitor,
    }
}

#[tokio::test]
async fn sweep_reaps_expired_jobs_across_pages() {
    let f = fixture();
    for n in 0..5 {
        f.queue
            .push("T", JobSubmission::new(format!("j{n}"), 0), Some(1_000), None)
            .await
            .unwrap();
    }
    f.queue
        .push("T", JobSubmission::new("crawl-job", 0), Some(1_000), Some("C"))
        .await
        .unwrap();

    f.clock.advance(Duration::from_millis(1_001));
    let report = f.janitor.run_once().await;

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.expired_jobs, 5);
    assert_eq!(f.queue.team_queue_count("T").await.unwrap(), 1);
    assert_eq!(f.queue.team_queued_job_ids("T", 10).await.unwrap(), vec!["crawl-job"]);
}

#[tokio::test]
async fn sweep_clears_timed_out_and_unreadable_claims() {
    let f = fixture();
    f.queue
        .push("T", JobSubmission::new("stuck", 0), None, None)
        .await
        .unwrap();
    f.queue
        .push("T", JobSubmission::new("garbled", 0), None, None)
        .await
        .unwrap();
    f.queue
        .push("T", JobSubmission::new("busy", 0), None, None)
        .await
        .unwrap();

    let claimed = f.queue.pop("T", "dead-worker", &[]).await.unwrap().unwrap();
    assert_eq!(claimed.job.id, "busy");

    // A claim whose recorded key cannot be decoded.
    let garbled_key = f
        .store
        .scan_team("T", 10)
        .await
        .unwrap()
        .into_iter()
        .find(|job| job.id == "garbled")
        .unwrap()
        .queue_key();
    f.store
        .append_claim(
            &garbled_key,
            &ClaimRecord {
                worker_id: "w".into(),
                queue_key: "%%%".into(),
                claimed_at: 1_000_000,
            },
        )
        .await
        .unwrap();

    let report = f.janitor.run_once().await;
    assert_eq!(report.orphaned_claims, 1);
    assert!(f.store.first_claim("garbled").await.unwrap().is_none());
    assert!(f.store.first_claim("busy").await.unwrap().is_some());

    f.clock
        .advance(Duration::from_millis(QueueConfig::default().claim_timeout_ms as u64 + 1));
    let report = f.janitor.run_once().await;
    assert_eq!(report.orphaned_claims, 1);

    // The dead worker's job is claimable again.
    let again = f.queue.pop("T", "fresh-worker", &[]).await.unwrap().unwrap();
    assert_eq!(again.job.id, "busy");
}

#[tokio::test]
async fn renewed_claims_survive_the_claim_timeout() {
    let f = fixture();
    let timeout = QueueConfig::default().claim_timeout_ms as u64;
    f.queue
        .push("T", JobSubmission::new("long", 0), None, None)
        .await
        .unwrap();

    let claimed = f.queue.pop("T", "w1", &[]).await.unwrap().unwrap();
    assert_eq!(claimed.worker_id, "w1");

    f.clock.advance(Duration::from_millis(timeout / 2));
    assert!(f.queue.renew_claim("long", &claimed.worker_id).await.unwrap());
    f.clock.advance(Duration::from_millis(timeout / 2 + 1_000));

    // Older than the timeout since the pop, but not since the last renewal.
    let report = f.janitor.run_once().await;
    assert_eq!(report.orphaned_claims, 0);
    assert!(f.queue.pop("T", "w2", &[]).await.unwrap().is_none());
    assert!(!f.queue.renew_claim("long", "w2").await.unwrap());

    // Once renewals stop the claim is reaped and the job moves on.
    f.clock.advance(Duration::from_millis(timeout + 1));
    let report = f.janitor.run_once().await;
    assert_eq!(report.orphaned_claims, 1);
    assert!(!f.queue.renew_claim("long", "w1").await.unwrap());
    let next = f.queue.pop("T", "w2", &[]).await.unwrap().unwrap();
    assert_eq!(next.job.id, "long");
}

#[tokio::test]
async fn sweep_repairs_drifted_and_stale_counters() {
    let f = fixture();
    f.queue
        .push("T", JobSubmission::new("a", 0), None, Some("C"))
        .await
        .unwrap();
    f.queue
        .push_active(Scope::Crawl, "C", "a", 60_000)
        .await
        .unwrap();

    f.store.set_counter(CounterKind::TeamQueue, "T", 4).await.unwrap();
    f.store.set_counter(CounterKind::CrawlActive, "C", 3).await.unwrap();
    f.store.set_counter(CounterKind::TeamQueue, "ghost", 7).await.unwrap();
    f.store.set_counter(CounterKind::TeamActive, "ghost", 2).await.unwrap();

    let report = f.janitor.run_once().await;
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert!(report.reconciled >= 3);

    assert_eq!(f.queue.team_queue_count("T").await.unwrap(), 1);
    assert_eq!(f.queue.active_count(Scope::Crawl, "C").await.unwrap(), 1);
    assert_eq!(f.queue.team_queue_count("ghost").await.unwrap(), 0);
    assert_eq!(f.queue.active_count(Scope::Team, "ghost").await.unwrap(), 0);

    // A clean pass finds nothing left to fix.
    let report = f.janitor.run_once().await;
    assert_eq!((report.reconciled, report.stale_counters), (0, 0));
}
