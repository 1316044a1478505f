//! Scripted collaborator for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use super::{Classification, Collaborator, Compaction, ConversationContext, ConversePurpose};
use crate::error::CollaboratorError;
use crate::models::{Capability, ChatMessage, JournalEntry, Profile};

/// Mock collaborator.
///
/// Each call pops the next scripted result for its method and falls back to
/// a fixed default once the script is exhausted. Calls are counted.
pub struct MockCollaborator {
    model_id: String,
    available: AtomicBool,
    classifications: Mutex<VecDeque<Result<Classification, CollaboratorError>>>,
    compactions: Mutex<VecDeque<Result<Compaction, CollaboratorError>>>,
    replies: Mutex<VecDeque<Result<String, CollaboratorError>>>,
    default_reply: String,
    delay: Option<Duration>,
    classify_calls: AtomicU32,
    summarize_calls: AtomicU32,
    converse_calls: AtomicU32,
    last_purpose: Mutex<Option<ConversePurpose>>,
    last_summarized: Mutex<Vec<JournalEntry>>,
}

impl MockCollaborator {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            available: AtomicBool::new(true),
            classifications: Mutex::new(VecDeque::new()),
            compactions: Mutex::new(VecDeque::new()),
            replies: Mutex::new(VecDeque::new()),
            default_reply: "Mock response".to_string(),
            delay: None,
            classify_calls: AtomicU32::new(0),
            summarize_calls: AtomicU32::new(0),
            converse_calls: AtomicU32::new(0),
            last_purpose: Mutex::new(None),
            last_summarized: Mutex::new(Vec::new()),
        }
    }

    pub fn with_classification(self, result: Result<Classification, CollaboratorError>) -> Self {
        lock(&self.classifications).push_back(result);
        self
    }

    pub fn with_compaction(self, result: Result<Compaction, CollaboratorError>) -> Self {
        lock(&self.compactions).push_back(result);
        self
    }

    pub fn with_reply(self, result: Result<String, CollaboratorError>) -> Self {
        lock(&self.replies).push_back(result);
        self
    }

    /// Reply used once the scripted replies run out.
    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    pub fn classify_calls(&self) -> u32 {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn summarize_calls(&self) -> u32 {
        self.summarize_calls.load(Ordering::SeqCst)
    }

    pub fn converse_calls(&self) -> u32 {
        self.converse_calls.load(Ordering::SeqCst)
    }

    /// Total calls across all methods.
    pub fn call_count(&self) -> u32 {
        self.classify_calls() + self.summarize_calls() + self.converse_calls()
    }

    pub fn last_purpose(&self) -> Option<ConversePurpose> {
        *lock(&self.last_purpose)
    }

    /// Entries handed to the most recent `summarize_and_reclassify` call.
    pub fn last_summarized(&self) -> Vec<JournalEntry> {
        lock(&self.last_summarized).clone()
    }

    async fn enter(&self, counter: &AtomicU32) -> Result<(), CollaboratorError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable(
                "Mock collaborator disabled".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MockCollaborator {
    fn default() -> Self {
        Self::new("mock-model")
    }
}

#[async_trait]
impl Collaborator for MockCollaborator {
    fn id(&self) -> &str {
        &self.model_id
    }

    async fn classify_and_extract(
        &self,
        _capability: &Capability,
        _text: &str,
        _reference_date: NaiveDate,
        _profile: &Profile,
    ) -> Result<Classification, CollaboratorError> {
        self.enter(&self.classify_calls).await?;
        lock(&self.classifications)
            .pop_front()
            .unwrap_or_else(|| Ok(Classification::default()))
    }

    async fn summarize_and_reclassify(
        &self,
        _capability: &Capability,
        entries: &[JournalEntry],
        _profile: &Profile,
    ) -> Result<Compaction, CollaboratorError> {
        *lock(&self.last_summarized) = entries.to_vec();
        self.enter(&self.summarize_calls).await?;
        lock(&self.compactions).pop_front().unwrap_or_else(|| {
            Ok(Compaction {
                summary: format!("Summary of {} entries", entries.len()),
                revised_classification: None,
            })
        })
    }

    async fn converse(
        &self,
        _capability: &Capability,
        _history: &[ChatMessage],
        context: &ConversationContext,
    ) -> Result<String, CollaboratorError> {
        *lock(&self.last_purpose) = Some(context.purpose);
        self.enter(&self.converse_calls).await?;
        lock(&self.replies)
            .pop_front()
            .unwrap_or_else(|| Ok(self.default_reply.clone()))
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
