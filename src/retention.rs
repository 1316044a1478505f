//! Retention / compaction pipeline
//!
//! Keeps the journal bounded: once the entries not tagged as summaries reach
//! the threshold, they are condensed by the collaborator into one summary
//! entry. Prior summaries are carried over untouched. A failed collaborator
//! call changes nothing, so the next evaluation simply tries again.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::calendar::Clock;
use crate::collaborator::Collaborator;
use crate::error::CollaboratorError;
use crate::models::{Capability, EntryKind, JournalEntry};
use crate::state::LocalStateStore;
use crate::sync::Synchronizer;

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum CompactionOutcome {
    BelowThreshold { unsummarized: usize },
    NoCapability,
    /// Another compaction is in flight
    AlreadyRunning,
    Compacted {
        summarized: usize,
        reclassified: bool,
    },
    Failed(CollaboratorError),
}

pub struct Compactor {
    store: Arc<LocalStateStore>,
    collaborator: Arc<dyn Collaborator>,
    clock: Arc<dyn Clock>,
    threshold: usize,
    running: AtomicBool,
}

impl Compactor {
    pub fn new(
        store: Arc<LocalStateStore>,
        collaborator: Arc<dyn Collaborator>,
        clock: Arc<dyn Clock>,
        threshold: usize,
    ) -> Self {
        Self {
            store,
            collaborator,
            clock,
            threshold: threshold.max(1),
            running: AtomicBool::new(false),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Compact if the unsummarized tail has reached the threshold.
    ///
    /// On success the journal becomes: entries appended while the call was
    /// in flight, then the new summary, then every earlier summary. The
    /// result is flushed immediately.
    pub async fn evaluate(&self, sync: &Synchronizer) -> CompactionOutcome {
        let unsummarized = self.store.read(|s| s.unsummarized_count());
        if unsummarized < self.threshold {
            return CompactionOutcome::BelowThreshold { unsummarized };
        }
        let Some(capability) = self.store.capability() else {
            debug!(unsummarized, "Compaction due but no capability");
            return CompactionOutcome::NoCapability;
        };
        let Some(_running) = RunningGuard::acquire(&self.running) else {
            return CompactionOutcome::AlreadyRunning;
        };

        self.compact(&capability, sync).await
    }

    async fn compact(
        &self,
        capability: &Capability,
        sync: &Synchronizer,
    ) -> CompactionOutcome {
        let (batch, profile) = self.store.read(|s| {
            let batch: Vec<JournalEntry> = s
                .journal
                .iter()
                .filter(|e| !e.kind.is_summary())
                .cloned()
                .collect();
            (batch, s.profile.clone())
        });

        info!(entries = batch.len(), "Compacting journal");
        let compaction = match self
            .collaborator
            .summarize_and_reclassify(capability, &batch, &profile)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Compaction failed, journal left unchanged");
                return CompactionOutcome::Failed(e);
            }
        };

        let summarized: HashSet<&str> = batch.iter().map(|e| e.id.as_str()).collect();
        let summary = JournalEntry::new(
            self.clock.today(),
            compaction.summary,
            EntryKind::Summary,
            self.clock.now(),
        );
        let reclassified = compaction.revised_classification.is_some();

        self.store.update(|s| {
            let mut journal: Vec<JournalEntry> = s
                .journal
                .iter()
                .filter(|e| !e.kind.is_summary() && !summarized.contains(e.id.as_str()))
                .cloned()
                .collect();
            journal.push(summary);
            journal.extend(s.journal.iter().filter(|e| e.kind.is_summary()).cloned());
            s.journal = journal;

            if let Some(constitution) = compaction.revised_classification {
                s.profile.constitution = constitution;
            }
        });

        if let Err(e) = sync.flush_now().await {
            warn!(error = %e, "Flush after compaction failed");
        }
        info!(summarized = batch.len(), reclassified, "Journal compacted");
        CompactionOutcome::Compacted {
            summarized: batch.len(),
            reclassified,
        }
    }
}

/// Holds the in-flight flag; released on drop, including when the
/// evaluating future is cancelled.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
