//! Generative-text collaborator
//!
//! The engine consumes three calls and treats every failure as "keep the
//! prior state":
//! - `classify_and_extract` - date inference, task extraction, risk note
//! - `summarize_and_reclassify` - journal compaction
//! - `converse` - free-form replies for the chat surfaces
//!
//! Backends return raw model text; [`parse`] turns it into typed results and
//! maps anything malformed onto [`CollaboratorError::Parse`].

pub mod gemini;
pub mod mock;
pub mod parse;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::models::{Capability, ChatMessage, JournalEntry, Profile};

pub use gemini::GeminiCollaborator;
pub use mock::MockCollaborator;

/// Result of classifying a free-text journal entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Day the entry is about, when it differs from the reference date
    pub inferred_date: Option<NaiveDate>,
    pub tasks: Vec<ExtractedTask>,
    pub risk_note: Option<String>,
}

/// A task-like item pulled out of journal text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTask {
    pub label: String,
    /// Raw duration; missing or non-positive values get the configured default
    pub hours: Option<f64>,
}

impl ExtractedTask {
    /// Duration to store, never zero or negative.
    pub fn hours_or(&self, default_hours: f64) -> f64 {
        match self.hours {
            Some(h) if h.is_finite() && h > 0.0 => h,
            _ => default_hours,
        }
    }
}

/// Result of compacting a batch of journal entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compaction {
    pub summary: String,
    /// Replacement constitution tag for the profile
    pub revised_classification: Option<String>,
}

/// What a `converse` call is for. Backends pick their instructions from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversePurpose {
    Consultation,
    Diagnosis,
    Meditation,
    /// One-line summary of a finished meditation transcript
    MeditationSummary,
    /// Short review of one habit cycle
    CycleReview,
}

/// Context passed along with a conversation.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub purpose: ConversePurpose,
    pub profile: Profile,
    /// Extra material for the model (e.g. cycle completion figures)
    pub notes: Option<String>,
}

impl ConversationContext {
    pub fn new(purpose: ConversePurpose, profile: Profile) -> Self {
        Self {
            purpose,
            profile,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Backend identifier (model name).
    fn id(&self) -> &str;

    async fn classify_and_extract(
        &self,
        capability: &Capability,
        text: &str,
        reference_date: NaiveDate,
        profile: &Profile,
    ) -> Result<Classification, CollaboratorError>;

    async fn summarize_and_reclassify(
        &self,
        capability: &Capability,
        entries: &[JournalEntry],
        profile: &Profile,
    ) -> Result<Compaction, CollaboratorError>;

    async fn converse(
        &self,
        capability: &Capability,
        history: &[ChatMessage],
        context: &ConversationContext,
    ) -> Result<String, CollaboratorError>;
}
