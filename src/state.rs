//! Local state store
//!
//! Holds the account entities in memory as replaceable snapshots. Every
//! mutation bumps a revision counter published on a watch channel; the
//! synchronizer observes the counter and reads the *current* state when its
//! debounce timer fires, never a copy captured earlier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use crate::models::{
    default_habit_tracks, AccountRecord, AchievementItem, Capability, ConversationHistories,
    HabitTrack, JournalEntry, Profile, Settings,
};

/// In-memory copy of everything persisted for the account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountState {
    pub profile: Profile,
    pub journal: Vec<JournalEntry>,
    pub achievements: Vec<AchievementItem>,
    pub habits: Vec<HabitTrack>,
    pub conversations: ConversationHistories,
    pub capability: Option<Capability>,
}

impl AccountState {
    /// Journal entries not produced by compaction.
    pub fn unsummarized_count(&self) -> usize {
        self.journal.iter().filter(|e| !e.kind.is_summary()).count()
    }

    /// Starter state for an account with no remote record.
    pub fn fresh(account: &str) -> Self {
        Self {
            profile: Profile::named(account),
            habits: default_habit_tracks(),
            ..Default::default()
        }
    }

    /// Build state from a fetched record. A missing profile name falls back
    /// to the account id and an empty habit list to the starter tracks.
    pub fn from_record(account: &str, record: AccountRecord) -> Self {
        let mut profile = record.profile.unwrap_or_default();
        if profile.name.trim().is_empty() {
            profile.name = account.to_string();
        }
        let habits = if record.habit_tracks.is_empty() {
            default_habit_tracks()
        } else {
            record.habit_tracks
        };
        Self {
            profile,
            journal: record.journal_entries,
            achievements: record.achievement_items,
            habits,
            conversations: record.conversation_histories,
            capability: record.settings.capability,
        }
    }

    pub fn into_record(self, now: DateTime<Utc>) -> AccountRecord {
        AccountRecord {
            profile: Some(self.profile),
            journal_entries: self.journal,
            achievement_items: self.achievements,
            conversation_histories: self.conversations,
            habit_tracks: self.habits,
            settings: Settings {
                capability: self.capability,
            },
            last_updated: Some(now),
        }
    }
}

/// Entity kinds held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Profile,
    Journal,
    Achievements,
    Habits,
    Conversations,
    Capability,
}

/// A whole-entity replacement value.
#[derive(Debug, Clone)]
pub enum Entity {
    Profile(Profile),
    Journal(Vec<JournalEntry>),
    Achievements(Vec<AchievementItem>),
    Habits(Vec<HabitTrack>),
    Conversations(ConversationHistories),
    Capability(Option<Capability>),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Profile(_) => EntityKind::Profile,
            Entity::Journal(_) => EntityKind::Journal,
            Entity::Achievements(_) => EntityKind::Achievements,
            Entity::Habits(_) => EntityKind::Habits,
            Entity::Conversations(_) => EntityKind::Conversations,
            Entity::Capability(_) => EntityKind::Capability,
        }
    }
}

pub struct LocalStateStore {
    state: RwLock<AccountState>,
    loaded: AtomicBool,
    revision: watch::Sender<u64>,
}

impl LocalStateStore {
    pub fn new(initial: AccountState) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: RwLock::new(initial),
            loaded: AtomicBool::new(false),
            revision,
        }
    }

    /// True once the initial fetch has populated the store.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Install loaded state and flip the loaded flag. Does not count as a
    /// mutation.
    pub(crate) fn hydrate(&self, state: AccountState) {
        *self.write_guard() = state;
        self.loaded.store(true, Ordering::SeqCst);
    }

    /// Drop all state and return to the unloaded condition.
    pub(crate) fn reset(&self, state: AccountState) {
        self.loaded.store(false, Ordering::SeqCst);
        *self.write_guard() = state;
    }

    /// Replace one entity wholesale.
    pub fn replace(&self, entity: Entity) {
        let kind = entity.kind();
        {
            let mut state = self.write_guard();
            match entity {
                Entity::Profile(v) => state.profile = v,
                Entity::Journal(v) => state.journal = v,
                Entity::Achievements(v) => state.achievements = v,
                Entity::Habits(v) => state.habits = v,
                Entity::Conversations(v) => state.conversations = v,
                Entity::Capability(v) => state.capability = v,
            }
        }
        debug!(?kind, "Entity replaced");
        self.bump();
    }

    /// Mutate in place. Always counts as a mutation.
    pub fn update<R>(&self, f: impl FnOnce(&mut AccountState) -> R) -> R {
        let result = f(&mut self.write_guard());
        self.bump();
        result
    }

    /// Mutate in place; counts as a mutation only when `f` returns `Some`.
    /// `f` must leave the state untouched when it returns `None`.
    pub fn try_update<R>(&self, f: impl FnOnce(&mut AccountState) -> Option<R>) -> Option<R> {
        let result = f(&mut self.write_guard());
        if result.is_some() {
            self.bump();
        }
        result
    }

    pub fn read<R>(&self, f: impl FnOnce(&AccountState) -> R) -> R {
        f(&self.read_guard())
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> AccountState {
        self.read_guard().clone()
    }

    pub fn capability(&self) -> Option<Capability> {
        self.read_guard().capability.clone()
    }

    /// Current mutation counter.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Watch the mutation counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Record a mutation without changing state, e.g. to persist seeded
    /// defaults.
    pub(crate) fn mark_dirty(&self) {
        self.bump();
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, AccountState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, AccountState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LocalStateStore {
    fn default() -> Self {
        Self::new(AccountState::default())
    }
}
