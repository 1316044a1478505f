//! Persistence synchronizer integration tests
//!
//! Runs on paused tokio time so debounce windows and retry delays are
//! virtual:
//! - Coalescing of mutations into one push carrying the final state
//! - Fresh-account seeding on a missing record
//! - Bounded load retries on connectivity failures
//! - Push failures reported without automatic retry

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::sleep;

use wellness_sync::config::SyncConfig;
use wellness_sync::models::{default_habit_tracks, AccountRecord, HabitTrack};
use wellness_sync::{
    Clock, FixedClock, LocalStateStore, MemoryStore, StoreError, SyncPhase, SyncStatus,
    Synchronizer,
};

fn sync_config() -> SyncConfig {
    SyncConfig {
        debounce_ms: 3000,
        load_attempts: 3,
        retry_delay_ms: 2000,
        initial_delay_ms: 500,
    }
}

fn clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock::new(NaiveDate::from_ymd_opt(2026, 4, 9).unwrap()))
}

fn started(remote: &Arc<MemoryStore>) -> (Arc<LocalStateStore>, Synchronizer) {
    let store = Arc::new(LocalStateStore::default());
    let mut sync = Synchronizer::new("ana", store.clone(), remote.clone(), clock(), sync_config());
    sync.start();
    (store, sync)
}

// =============================================================================
// Debounced pushes
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_mutations_within_window_coalesce_into_one_push() {
    let remote = Arc::new(MemoryStore::new().with_record("ana", AccountRecord::fresh("ana")));
    let (store, sync) = started(&remote);
    sync.load().await.unwrap();

    for i in 0..5 {
        store.update(|s| s.profile.goals = format!("goal {i}"));
        store.update(|s| s.habits.push(HabitTrack::new(format!("h{i}"), "Stretch")));
        sleep(Duration::from_millis(500)).await;
    }
    assert_eq!(remote.update_calls(), 0, "window still open");

    sleep(Duration::from_secs(4)).await;
    assert_eq!(remote.update_calls(), 1);

    let pushed = &remote.pushes()[0];
    assert_eq!(pushed.profile.as_ref().unwrap().goals, "goal 4");
    assert_eq!(pushed.habit_tracks.len(), 3 + 5);
    assert_eq!(sync.status(), SyncStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_push_reads_state_at_fire_time() {
    let remote = Arc::new(MemoryStore::new().with_record("ana", AccountRecord::fresh("ana")));
    let (store, sync) = started(&remote);
    sync.load().await.unwrap();

    store.update(|s| s.profile.age = "30".into());
    sleep(Duration::from_millis(2900)).await;
    // Re-arms the timer; the earlier value must never be pushed alone
    store.update(|s| s.profile.age = "31".into());
    sleep(Duration::from_secs(5)).await;

    let pushes = remote.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].profile.as_ref().unwrap().age, "31");
}

#[tokio::test(start_paused = true)]
async fn test_separate_windows_push_separately() {
    let remote = Arc::new(MemoryStore::new().with_record("ana", AccountRecord::fresh("ana")));
    let (store, sync) = started(&remote);
    sync.load().await.unwrap();

    store.update(|s| s.profile.goals = "first".into());
    sleep(Duration::from_secs(4)).await;
    store.update(|s| s.profile.goals = "second".into());
    sleep(Duration::from_secs(4)).await;

    let goals: Vec<String> = remote
        .pushes()
        .into_iter()
        .map(|r| r.profile.unwrap().goals)
        .collect();
    assert_eq!(goals, vec!["first", "second"]);
}

#[tokio::test(start_paused = true)]
async fn test_push_failure_is_not_retried() {
    let remote = Arc::new(MemoryStore::new().with_record("ana", AccountRecord::fresh("ana")));
    let (store, sync) = started(&remote);
    sync.load().await.unwrap();
    remote.fail_updates([StoreError::Transient("connection reset".into())]);

    store.update(|s| s.profile.goals = "rest".into());
    sleep(Duration::from_secs(4)).await;
    assert_eq!(remote.update_calls(), 1);
    assert!(matches!(sync.phase(), SyncPhase::SyncError(_)));
    assert!(matches!(sync.status(), SyncStatus::Error(_)));

    sleep(Duration::from_secs(30)).await;
    assert_eq!(remote.update_calls(), 1, "no automatic retry");

    // The next mutation supersedes the failed push
    store.update(|s| s.profile.goals = "rest more".into());
    sleep(Duration::from_secs(4)).await;
    assert_eq!(remote.update_calls(), 2);
    assert_eq!(sync.phase(), SyncPhase::Loaded);
    assert_eq!(
        remote.record("ana").unwrap().profile.unwrap().goals,
        "rest more"
    );
}

// =============================================================================
// Load
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_missing_record_seeds_fresh_account() {
    let remote = Arc::new(MemoryStore::new());
    let (store, sync) = started(&remote);

    sync.load().await.unwrap();

    let state = store.snapshot();
    assert_eq!(state.habits, default_habit_tracks());
    assert!(state.journal.is_empty());
    assert!(state.achievements.is_empty());
    assert!(state.conversations.consultation.is_empty());
    assert_eq!(state.profile.name, "ana");
    assert_eq!(sync.phase(), SyncPhase::Loaded);

    // Seeded defaults are persisted through the normal debounce path
    sleep(Duration::from_secs(4)).await;
    let pushed = remote.record("ana").expect("seeded record pushed");
    assert_eq!(pushed.habit_tracks.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_two_transient_failures_then_success() {
    let remote = Arc::new(
        MemoryStore::new()
            .with_record("ana", AccountRecord::fresh("ana"))
            .fail_gets([
                StoreError::Transient("timeout".into()),
                StoreError::Transient("timeout".into()),
            ]),
    );
    let (store, sync) = started(&remote);

    sync.load().await.unwrap();

    assert_eq!(remote.get_calls(), 3);
    assert!(store.is_loaded());
    assert_eq!(sync.phase(), SyncPhase::Loaded);
}

#[tokio::test(start_paused = true)]
async fn test_load_gives_up_after_bounded_attempts() {
    let remote = Arc::new(MemoryStore::new().fail_gets(
        std::iter::repeat(StoreError::Transient("unreachable".into())).take(5),
    ));
    let (store, sync) = started(&remote);

    let err = sync.load().await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(remote.get_calls(), 3);
    assert!(!store.is_loaded());
    assert!(matches!(sync.phase(), SyncPhase::LoadError(_)));
}

#[tokio::test(start_paused = true)]
async fn test_reconnecting_status_between_attempts() {
    let remote = Arc::new(
        MemoryStore::new()
            .with_record("ana", AccountRecord::fresh("ana"))
            .fail_gets([StoreError::Transient("timeout".into())]),
    );
    let store = Arc::new(LocalStateStore::default());
    let sync = Arc::new(Synchronizer::new(
        "ana",
        store.clone(),
        remote.clone(),
        clock(),
        sync_config(),
    ));

    let loader = {
        let sync = sync.clone();
        tokio::spawn(async move { sync.load().await })
    };

    // initial delay (0.5s) + first attempt, then inside the 2s retry delay
    sleep(Duration::from_secs(1)).await;
    assert_eq!(sync.phase(), SyncPhase::Reconnecting { attempt: 1, of: 3 });
    assert!(matches!(sync.status(), SyncStatus::Error(_)));

    loader.await.unwrap().unwrap();
    assert_eq!(sync.phase(), SyncPhase::Loaded);
}

#[tokio::test(start_paused = true)]
async fn test_hydration_alone_does_not_push() {
    let remote = Arc::new(MemoryStore::new().with_record("ana", AccountRecord::fresh("ana")));
    let (_store, sync) = started(&remote);

    sync.load().await.unwrap();
    sleep(Duration::from_secs(10)).await;

    assert_eq!(remote.update_calls(), 0);
}
