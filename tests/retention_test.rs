//! Journal compaction integration tests, driven through the session.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};

use wellness_sync::collaborator::Compaction;
use wellness_sync::models::{AccountRecord, Capability, EntryKind, JournalEntry};
use wellness_sync::{
    CollaboratorError, CompactionOutcome, Config, FixedClock, MemoryStore, MockCollaborator,
    Session,
};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 6, 12).unwrap()
}

fn config() -> Config {
    let mut config = Config::default();
    config.sync.initial_delay_ms = 0;
    config
}

fn entry(content: &str, kind: EntryKind) -> JournalEntry {
    JournalEntry::new(
        today(),
        content,
        kind,
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap(),
    )
}

/// Record with a capability, `raw` unsummarized entries and `summaries`
/// prior summary entries.
fn record(raw: usize, summaries: usize) -> AccountRecord {
    let mut record = AccountRecord::fresh("ana");
    record.settings.capability = Capability::new("key");
    for i in 0..raw {
        record
            .journal_entries
            .push(entry(&format!("raw {i}"), EntryKind::Mood));
    }
    for i in 0..summaries {
        record
            .journal_entries
            .push(entry(&format!("older summary {i}"), EntryKind::Summary));
    }
    record
}

fn open(remote: &Arc<MemoryStore>, collaborator: &Arc<MockCollaborator>) -> Session {
    Session::new(
        "ana",
        remote.clone(),
        collaborator.clone(),
        Arc::new(FixedClock::new(today())),
        &config(),
    )
}

#[tokio::test]
async fn test_seventh_entry_triggers_exactly_one_compaction() {
    let remote = Arc::new(MemoryStore::new().with_record("ana", record(0, 2)));
    let collaborator = Arc::new(MockCollaborator::default());
    let session = open(&remote, &collaborator);
    session.load().await.unwrap();
    let prior: Vec<JournalEntry> = session.journal();

    for i in 0..6 {
        session
            .record_entry(&format!("felt ok {i}"), EntryKind::Mood, None)
            .await
            .unwrap();
    }
    assert_eq!(collaborator.summarize_calls(), 0);

    session
        .record_entry("felt great", EntryKind::Mood, None)
        .await
        .unwrap();
    assert_eq!(collaborator.summarize_calls(), 1);
    assert_eq!(collaborator.last_summarized().len(), 7);

    let journal = session.journal();
    assert_eq!(journal.len(), 1 + prior.len());
    assert_eq!(journal[0].kind, EntryKind::Summary);
    assert_eq!(journal[0].date, today());
    assert_eq!(&journal[1..], &prior[..], "prior summaries untouched");
}

#[tokio::test]
async fn test_compaction_is_flushed_immediately() {
    let remote = Arc::new(MemoryStore::new().with_record("ana", record(6, 0)));
    let collaborator = Arc::new(MockCollaborator::default().with_compaction(Ok(Compaction {
        summary: "A steady week.".into(),
        revised_classification: Some("Phlegm-Dampness".into()),
    })));
    let session = open(&remote, &collaborator);
    session.load().await.unwrap();

    session
        .record_entry("heavy dinner", EntryKind::Diet, None)
        .await
        .unwrap();

    let stored = remote.record("ana").unwrap();
    assert_eq!(stored.journal_entries.len(), 1);
    assert_eq!(stored.journal_entries[0].content, "A steady week.");
    assert_eq!(stored.profile.unwrap().constitution, "Phlegm-Dampness");
}

#[tokio::test]
async fn test_failed_compaction_leaves_journal_unchanged() {
    let seeded = record(7, 1);
    let remote = Arc::new(MemoryStore::new().with_record("ana", seeded.clone()));
    let collaborator = Arc::new(
        MockCollaborator::default().with_compaction(Err(CollaboratorError::RateLimited)),
    );
    let session = open(&remote, &collaborator);

    // Load runs the first evaluation, which fails
    session.load().await.unwrap();
    assert_eq!(collaborator.summarize_calls(), 1);
    assert_eq!(session.journal(), seeded.journal_entries);
    assert!(session.snapshot().unsummarized_count() >= 7);

    // Still above the threshold, so the next evaluation retries
    let outcome = session.compact().await.unwrap();
    assert_eq!(
        outcome,
        CompactionOutcome::Compacted {
            summarized: 7,
            reclassified: false
        }
    );
    assert_eq!(session.journal().len(), 2);
}

#[tokio::test]
async fn test_summaries_are_never_resummarized() {
    let remote = Arc::new(MemoryStore::new().with_record("ana", record(7, 0)));
    let collaborator = Arc::new(MockCollaborator::default());
    let session = open(&remote, &collaborator);
    session.load().await.unwrap();
    assert_eq!(collaborator.summarize_calls(), 1);

    for i in 0..7 {
        session
            .record_entry(&format!("note {i}"), EntryKind::Mood, None)
            .await
            .unwrap();
    }
    assert_eq!(collaborator.summarize_calls(), 2);
    assert!(collaborator
        .last_summarized()
        .iter()
        .all(|e| e.kind != EntryKind::Summary));

    let kinds: Vec<EntryKind> = session.journal().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EntryKind::Summary, EntryKind::Summary]);
}

#[tokio::test]
async fn test_summary_marker_in_content_still_counts_as_raw() {
    let mut seeded = record(6, 0);
    seeded
        .journal_entries
        .push(entry("[summary] copied from somewhere", EntryKind::General));
    let remote = Arc::new(MemoryStore::new().with_record("ana", seeded));
    let collaborator = Arc::new(MockCollaborator::default());
    let session = open(&remote, &collaborator);

    session.load().await.unwrap();

    assert_eq!(collaborator.summarize_calls(), 1);
}

#[tokio::test]
async fn test_without_capability_nothing_is_compacted() {
    let mut seeded = record(9, 0);
    seeded.settings.capability = None;
    let remote = Arc::new(MemoryStore::new().with_record("ana", seeded));
    let collaborator = Arc::new(MockCollaborator::default());
    let session = open(&remote, &collaborator);
    session.load().await.unwrap();

    assert_eq!(
        session.compact().await.unwrap(),
        CompactionOutcome::NoCapability
    );
    assert_eq!(collaborator.summarize_calls(), 0);
    assert_eq!(session.journal().len(), 9);
}

#[tokio::test(start_paused = true)]
async fn test_entries_appended_during_compaction_survive() {
    let remote = Arc::new(MemoryStore::new().with_record("ana", record(6, 1)));
    let collaborator =
        Arc::new(MockCollaborator::default().with_delay(Duration::from_secs(5)));
    let session = open(&remote, &collaborator);
    session.load().await.unwrap();

    let (first, late) = tokio::join!(
        session.record_entry("seventh", EntryKind::Mood, None),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            session.record_entry("late", EntryKind::Mood, None).await
        }
    );
    first.unwrap();
    late.unwrap();

    assert_eq!(collaborator.summarize_calls(), 1, "not re-entrant");
    let journal = session.journal();
    let kinds: Vec<EntryKind> = journal.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EntryKind::Mood, EntryKind::Summary, EntryKind::Summary]
    );
    assert_eq!(journal[0].content, "late");
    assert_eq!(journal[2].content, "older summary 0");
}
