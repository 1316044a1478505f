//! Capability gate integration tests
//!
//! Gated session actions must not reach the collaborator without a
//! capability, and must run exactly once after one is supplied.

use std::sync::Arc;

use chrono::NaiveDate;

use wellness_sync::models::{AccountRecord, EntryKind, Surface};
use wellness_sync::{
    ActionOutcome, CompactionOutcome, Config, FixedClock, Gated, MemoryStore, MockCollaborator, Session,
    SessionError,
};

fn config() -> Config {
    let mut config = Config::default();
    config.sync.initial_delay_ms = 0;
    config
}

async fn loaded(
    collaborator: MockCollaborator,
) -> (Session, Arc<MemoryStore>, Arc<MockCollaborator>) {
    let remote = Arc::new(MemoryStore::new().with_record("ana", AccountRecord::fresh("ana")));
    let collaborator = Arc::new(collaborator);
    let session = Session::new(
        "ana",
        remote.clone(),
        collaborator.clone(),
        Arc::new(FixedClock::new(NaiveDate::from_ymd_opt(2026, 2, 3).unwrap())),
        &config(),
    );
    session.load().await.unwrap();
    (session, remote, collaborator)
}

#[tokio::test]
async fn test_gated_action_waits_for_capability() {
    let (session, _, collaborator) =
        loaded(MockCollaborator::default().with_default_reply("Drink warm water.")).await;

    let result = session.consult("I feel cold", None).await.unwrap();
    assert!(result.is_suspended());
    assert!(session.is_prompting_capability());
    assert_eq!(collaborator.converse_calls(), 0);
    assert!(session.conversation(Surface::Consultation).is_empty());

    let resumed = session.submit_capability("key").await.unwrap();
    assert_eq!(
        resumed,
        Some(ActionOutcome::Consulted(Some("Drink warm water.".into())))
    );
    assert_eq!(collaborator.converse_calls(), 1);
    assert!(!session.is_prompting_capability());

    // Submitting again does not replay the action
    assert_eq!(session.submit_capability("key").await.unwrap(), None);
    assert_eq!(collaborator.converse_calls(), 1);
}

#[tokio::test]
async fn test_capability_is_flushed_on_submit() {
    let (session, remote, _) = loaded(MockCollaborator::default()).await;

    session.submit_capability("  secret-key ").await.unwrap();

    let stored = remote.record("ana").unwrap();
    assert_eq!(
        stored.settings.capability.as_ref().map(|c| c.expose()),
        Some("secret-key")
    );
}

#[tokio::test]
async fn test_dismissed_action_is_discarded() {
    let (session, _, collaborator) = loaded(MockCollaborator::default()).await;

    assert!(session.diagnose("tired after lunch").await.unwrap().is_suspended());
    session.dismiss_capability_prompt();
    assert!(!session.is_prompting_capability());

    assert_eq!(session.submit_capability("key").await.unwrap(), None);
    assert_eq!(collaborator.converse_calls(), 0);
}

#[tokio::test]
async fn test_latest_gated_call_wins() {
    let (session, _, collaborator) =
        loaded(MockCollaborator::default().with_default_reply("Tell me more.")).await;

    assert!(session.consult("headache", None).await.unwrap().is_suspended());
    assert!(session.diagnose("cold hands").await.unwrap().is_suspended());

    let resumed = session.submit_capability("key").await.unwrap();
    assert_eq!(
        resumed,
        Some(ActionOutcome::Diagnosed(Some("Tell me more.".into())))
    );
    assert_eq!(collaborator.converse_calls(), 1);
    assert!(session.conversation(Surface::Consultation).is_empty());
    assert_eq!(session.conversation(Surface::Diagnosis).len(), 2);
}

#[tokio::test]
async fn test_present_capability_runs_immediately() {
    let (session, _, collaborator) =
        loaded(MockCollaborator::default().with_default_reply("Breathe in slowly.")).await;
    session.submit_capability("key").await.unwrap();

    let reply = session.meditate("I want to relax").await.unwrap();

    assert_eq!(reply, Gated::Ran(Some("Breathe in slowly.".into())));
    assert_eq!(collaborator.converse_calls(), 1);
    assert!(!session.is_prompting_capability());
}

#[tokio::test]
async fn test_blank_capability_is_rejected() {
    let (session, _, collaborator) = loaded(MockCollaborator::default()).await;
    assert!(session.consult("hello", None).await.unwrap().is_suspended());

    let err = session.submit_capability("   ").await.unwrap_err();

    assert!(matches!(err, SessionError::Validation(_)));
    assert!(session.is_prompting_capability(), "prompt stays open");
    assert!(session.snapshot().capability.is_none());
    assert_eq!(collaborator.converse_calls(), 0);
}

#[tokio::test]
async fn test_cleared_capability_gates_again() {
    let (session, _, collaborator) = loaded(MockCollaborator::default()).await;
    session.submit_capability("key").await.unwrap();
    session.clear_capability().await.unwrap();

    assert!(session.consult("hello", None).await.unwrap().is_suspended());
    assert_eq!(collaborator.converse_calls(), 0);
}

#[tokio::test]
async fn test_no_backend_call_without_capability() {
    let (session, _, collaborator) = loaded(MockCollaborator::default()).await;

    for i in 0..7 {
        session
            .record_entry(&format!("Walked to work {i}"), EntryKind::General, None)
            .await
            .unwrap();
    }
    assert!(session.diagnose("headache").await.unwrap().is_suspended());
    assert!(session.meditate("breathing").await.unwrap().is_suspended());
    assert!(session.analyze_cycle(1).await.unwrap().is_suspended());
    assert_eq!(session.compact().await.unwrap(), CompactionOutcome::NoCapability);

    assert_eq!(collaborator.classify_calls(), 0);
    assert_eq!(collaborator.summarize_calls(), 0);
    assert_eq!(collaborator.converse_calls(), 0);
}
