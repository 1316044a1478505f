//! Account entities and the remote record shape
//!
//! Everything the journal persists for one account: profile, journal
//! entries, achievement items, habit tracks, conversation histories and the
//! collaborator capability.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::calendar::CYCLE_LENGTH;

/// Account identity (the login name).
pub type AccountId = String;

/// User profile. One per account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub name: String,
    pub age: String,
    pub gender: String,
    /// Constitution classification tag, e.g. "Qi-Deficiency". Only changed by
    /// compaction or the diagnosis flow.
    pub constitution: String,
    /// Medical history
    pub history: String,
    pub allergies: String,
    /// Long-term goals
    pub goals: String,
}

impl Profile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Kind tag of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    General,
    Mood,
    Diet,
    Work,
    Meditation,
    Diagnosis,
    /// Produced by compaction; never summarised again
    Summary,
    #[serde(other)]
    Other,
}

impl EntryKind {
    pub fn is_summary(self) -> bool {
        matches!(self, EntryKind::Summary)
    }
}

/// A single journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    pub date: NaiveDate,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Health risk note attached by the classifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_note: Option<String>,
}

impl JournalEntry {
    pub fn new(
        date: NaiveDate,
        content: impl Into<String>,
        kind: EntryKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            date,
            content: content.into(),
            kind,
            timestamp,
            image: None,
            risk_note: None,
        }
    }

    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }
}

/// A completed task for a given day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementItem {
    pub id: String,
    pub date: NaiveDate,
    pub activity: String,
    /// Always > 0
    pub hours: f64,
    pub completed: bool,
}

/// A habit tracked across 10-day cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitTrack {
    pub id: String,
    pub name: String,
    /// Cycle index -> per-day completion. Rows are created on first toggle.
    #[serde(default)]
    pub history: BTreeMap<u32, [bool; CYCLE_LENGTH as usize]>,
}

impl HabitTrack {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            history: BTreeMap::new(),
        }
    }

    /// Completed days in `cycle`.
    pub fn completed_in(&self, cycle: u32) -> usize {
        self.history
            .get(&cycle)
            .map(|days| days.iter().filter(|d| **d).count())
            .unwrap_or(0)
    }

    /// Flip one day, creating the cycle row if needed. Callers check
    /// writability first.
    pub(crate) fn flip(&mut self, cycle: u32, day_in_cycle: usize) {
        let row = self
            .history
            .entry(cycle)
            .or_insert([false; CYCLE_LENGTH as usize]);
        row[day_in_cycle] = !row[day_in_cycle];
    }
}

/// Starter habit tracks seeded for fresh accounts.
pub fn default_habit_tracks() -> Vec<HabitTrack> {
    vec![
        HabitTrack::new("1", "Early to bed (23:00)"),
        HabitTrack::new("2", "Read 30 min"),
        HabitTrack::new("3", "Baduanjin / exercise"),
    ]
}

/// Speaker of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            timestamp,
            image: None,
        }
    }
}

/// Conversational surfaces with their own history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    Consultation,
    Diagnosis,
    Meditation,
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Surface::Consultation => "consultation",
            Surface::Diagnosis => "diagnosis",
            Surface::Meditation => "meditation",
        };
        f.write_str(name)
    }
}

/// Message histories, one per surface. Append-only except for resets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationHistories {
    pub consultation: Vec<ChatMessage>,
    pub diagnosis: Vec<ChatMessage>,
    pub meditation: Vec<ChatMessage>,
}

impl ConversationHistories {
    pub fn get(&self, surface: Surface) -> &[ChatMessage] {
        match surface {
            Surface::Consultation => &self.consultation,
            Surface::Diagnosis => &self.diagnosis,
            Surface::Meditation => &self.meditation,
        }
    }

    pub fn get_mut(&mut self, surface: Surface) -> &mut Vec<ChatMessage> {
        match surface {
            Surface::Consultation => &mut self.consultation,
            Surface::Diagnosis => &mut self.diagnosis,
            Surface::Meditation => &mut self.meditation,
        }
    }
}

/// Opaque secret gating every collaborator call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    /// Returns `None` for blank input.
    pub fn new(secret: impl Into<String>) -> Option<Self> {
        let secret = secret.into().trim().to_string();
        if secret.is_empty() {
            None
        } else {
            Some(Self(secret))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Capability(<redacted>)")
    }
}

/// Account settings stored next to the entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<Capability>,
}

/// Full remote record for one account. Pushed as a whole on every save.
///
/// Columns may be missing or `null` in stored rows; both read as empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub journal_entries: Vec<JournalEntry>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub achievement_items: Vec<AchievementItem>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub conversation_histories: ConversationHistories,
    #[serde(default, deserialize_with = "null_as_default")]
    pub habit_tracks: Vec<HabitTrack>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub settings: Settings,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl AccountRecord {
    /// Record written when an account is registered.
    pub fn fresh(account: &str) -> Self {
        Self {
            profile: Some(Profile::named(account)),
            journal_entries: Vec::new(),
            achievement_items: Vec::new(),
            conversation_histories: ConversationHistories::default(),
            habit_tracks: default_habit_tracks(),
            settings: Settings::default(),
            last_updated: None,
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
