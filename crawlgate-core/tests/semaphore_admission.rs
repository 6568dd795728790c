use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crawlgate_core::config::SemaphoreConfig;
use crawlgate_core::error::GateError;
use crawlgate_core::metrics::{GuardStats, names};
use crawlgate_core::semaphore::{ConcurrencyGuard, TeamSemaphore};
use crawlgate_core::store::MemoryStore;
use crawlgate_core::time::ManualClock;
use tokio_util::sync::CancellationToken;

fn guard(clock: Arc<ManualClock>, stats: Arc<GuardStats>) -> ConcurrencyGuard {
    let config = SemaphoreConfig {
        acquire_timeout_ms: 5_000,
        ..SemaphoreConfig::default()
    };
    let semaphore = TeamSemaphore::new(Arc::new(MemoryStore::new()), config).with_clock(clock);
    ConcurrencyGuard::new(Arc::new(semaphore)).with_metrics(stats)
}

#[tokio::test(start_paused = true)]
async fn guarded_work_never_exceeds_the_team_limit() {
    let stats = Arc::new(GuardStats::new());
    let guard = Arc::new(guard(Arc::new(ManualClock::new(1_000)), stats.clone()));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for n in 0..6 {
        let guard = guard.clone();
        let running = running.clone();
        let peak = peak.clone();
        tasks.push(tokio::spawn(async move {
            guard
                .with_semaphore(
                    "T",
                    &format!("holder-{n}"),
                    2,
                    &CancellationToken::new(),
                    None,
                    |_| async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, GateError>(n)
                    },
                )
                .await
        }));
    }

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(guard.semaphore().count("T").await.unwrap(), 0);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.counter(names::ACQUIRE_GRANTED), 6);
    assert!(snapshot.counter(names::ACQUIRE_RETRIED) >= 4);
    assert_eq!(snapshot.counter(names::ACTIVE), 0);
}

#[tokio::test(start_paused = true)]
async fn waiter_times_out_while_the_team_is_full() {
    let stats = Arc::new(GuardStats::new());
    let guard = guard(Arc::new(ManualClock::new(1_000)), stats.clone());
    guard.semaphore().acquire("T", "holder", 1).await.unwrap();

    let err = guard
        .with_semaphore(
            "T",
            "waiter",
            1,
            &CancellationToken::new(),
            Some(Duration::from_millis(300)),
            |_| async { Ok::<_, GateError>(()) },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, GateError::AdmissionTimeout { .. }));
    assert_eq!(stats.snapshot().counter(names::ACQUIRE_TIMEOUT), 1);
    assert_eq!(guard.semaphore().count("T").await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelling_a_waiter_aborts_admission() {
    let guard = guard(Arc::new(ManualClock::new(1_000)), Arc::new(GuardStats::new()));
    guard.semaphore().acquire("T", "holder", 1).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = guard
        .with_semaphore("T", "waiter", 1, &cancel, None, |_| async {
            Ok::<_, GateError>(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::AdmissionAborted { .. }));
}

#[tokio::test]
async fn abandoned_lease_frees_its_slot_after_the_ttl() {
    let clock = Arc::new(ManualClock::new(1_000));
    let semaphore = TeamSemaphore::new(Arc::new(MemoryStore::new()), SemaphoreConfig::default())
        .with_clock(clock.clone());

    assert!(semaphore.acquire("T", "crashed", 1).await.unwrap().granted);
    assert!(!semaphore.acquire("T", "next", 1).await.unwrap().granted);

    clock.advance(semaphore.config().lease_ttl());
    let outcome = semaphore.acquire("T", "next", 1).await.unwrap();
    assert!(outcome.granted);
    assert_eq!(outcome.removed, 1);
    assert!(!semaphore.heartbeat("T", "crashed", None).await.unwrap());
}
