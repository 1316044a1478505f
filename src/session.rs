//! Account session
//!
//! The operations every screen performs. Each mutation is applied to the
//! local state store synchronously and reaches the remote store through the
//! synchronizer's debounce loop; profile commits, capability changes,
//! constitution updates and compaction also flush immediately.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::calendar::{self, Clock};
use crate::collaborator::{
    parse, Classification, Collaborator, ConversationContext, ConversePurpose,
};
use crate::config::{Config, RetentionConfig};
use crate::error::{SessionError, StoreError};
use crate::gate::{Admission, CapabilityGate, Gated};
use crate::models::{
    new_id, AccountId, AccountRecord, AchievementItem, Capability, ChatMessage, EntryKind,
    HabitTrack, JournalEntry, Profile, Role, Surface,
};
use crate::remote::RemoteStore;
use crate::retention::{CompactionOutcome, Compactor};
use crate::state::{AccountState, Entity, LocalStateStore};
use crate::sync::{SyncPhase, SyncStatus, Synchronizer};

/// Actions that wait behind the capability gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GatedAction {
    Consult { text: String, image: Option<String> },
    Diagnose(String),
    Meditate(String),
    AnalyzeCycle(u32),
}

/// What a resumed gated action produced. `None` means the collaborator
/// call failed and nothing was recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Consulted(Option<String>),
    Diagnosed(Option<String>),
    Meditated(Option<String>),
    CycleReviewed(Option<String>),
}

pub struct Session {
    account: AccountId,
    store: Arc<LocalStateStore>,
    sync: Synchronizer,
    remote: Arc<dyn RemoteStore>,
    collaborator: Arc<dyn Collaborator>,
    compactor: Compactor,
    gate: CapabilityGate<GatedAction>,
    clock: Arc<dyn Clock>,
    retention: RetentionConfig,
}

impl Session {
    /// Build a session and start its debounce loop. Must be called from
    /// within a tokio runtime.
    pub fn new(
        account: impl Into<AccountId>,
        remote: Arc<dyn RemoteStore>,
        collaborator: Arc<dyn Collaborator>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let account = account.into();
        let store = Arc::new(LocalStateStore::default());
        let mut sync = Synchronizer::new(
            account.clone(),
            store.clone(),
            remote.clone(),
            clock.clone(),
            config.sync.clone(),
        );
        sync.start();
        let compactor = Compactor::new(
            store.clone(),
            collaborator.clone(),
            clock.clone(),
            config.retention.threshold,
        );

        Self {
            account,
            store,
            sync,
            remote,
            collaborator,
            compactor,
            gate: CapabilityGate::new(),
            clock,
            retention: config.retention.clone(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Load the account, then run a compaction check.
    pub async fn load(&self) -> Result<(), SessionError> {
        self.sync.load().await.map_err(SessionError::Load)?;
        let outcome = self.compactor.evaluate(&self.sync).await;
        debug!(?outcome, "Post-load compaction check");
        Ok(())
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn is_loaded(&self) -> bool {
        self.store.is_loaded()
    }

    pub fn status(&self) -> SyncStatus {
        self.sync.status()
    }

    pub fn phase(&self) -> SyncPhase {
        self.sync.phase()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncPhase> {
        self.sync.subscribe()
    }

    pub fn snapshot(&self) -> AccountState {
        self.store.snapshot()
    }

    pub fn store(&self) -> &Arc<LocalStateStore> {
        &self.store
    }

    /// Push the current state right away.
    pub async fn flush(&self) -> Result<(), SessionError> {
        self.ensure_loaded()?;
        self.sync.flush_now().await?;
        Ok(())
    }

    /// Run a compaction check outside the journal flow.
    pub async fn compact(&self) -> Result<CompactionOutcome, SessionError> {
        self.ensure_loaded()?;
        Ok(self.compactor.evaluate(&self.sync).await)
    }

    // --- Profile ---

    /// Commit a profile edit and flush it. The constitution tag is kept; it
    /// only changes through compaction or diagnosis. The edit stays applied
    /// locally when the flush fails.
    pub async fn update_profile(&self, profile: Profile) -> Result<(), SessionError> {
        self.ensure_loaded()?;
        self.store.update(|s| {
            let constitution = std::mem::take(&mut s.profile.constitution);
            s.profile = profile;
            s.profile.constitution = constitution;
        });
        self.sync.flush_now().await?;
        Ok(())
    }

    pub fn set_goals(&self, goals: impl Into<String>) -> Result<(), SessionError> {
        self.ensure_loaded()?;
        let goals = goals.into();
        self.store.update(|s| s.profile.goals = goals);
        Ok(())
    }

    // --- Journal ---

    /// Record a journal entry dated today.
    ///
    /// General entries are classified when a capability is present: the
    /// entry may be re-dated, extracted tasks become achievement items and
    /// a risk note may be attached. Classification failures keep the entry
    /// as written.
    pub async fn record_entry(
        &self,
        text: &str,
        kind: EntryKind,
        image: Option<String>,
    ) -> Result<JournalEntry, SessionError> {
        self.ensure_loaded()?;
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return Err(SessionError::Validation(
                "Journal entry is empty".to_string(),
            ));
        }

        let today = self.clock.today();
        let entry = JournalEntry::new(today, text, kind, self.clock.now()).with_image(image);
        let id = entry.id.clone();
        self.store.update(|s| s.journal.insert(0, entry.clone()));

        if kind == EntryKind::General && !text.is_empty() {
            if let Some(capability) = self.store.capability() {
                let profile = self.store.read(|s| s.profile.clone());
                match self
                    .collaborator
                    .classify_and_extract(&capability, text, today, &profile)
                    .await
                {
                    Ok(classification) => self.apply_classification(&id, today, classification),
                    Err(e) => warn!(error = %e, "Classification failed, entry kept as written"),
                }
            }
        }

        let outcome = self.compactor.evaluate(&self.sync).await;
        debug!(?outcome, "Compaction check after journal append");

        Ok(self
            .store
            .read(|s| s.journal.iter().find(|e| e.id == id).cloned())
            .unwrap_or(entry))
    }

    fn apply_classification(&self, id: &str, today: NaiveDate, classification: Classification) {
        let date = classification.inferred_date.unwrap_or(today);
        if date == today && classification.tasks.is_empty() && classification.risk_note.is_none() {
            return;
        }

        let default_hours = self.retention.default_task_hours;
        let items: Vec<AchievementItem> = classification
            .tasks
            .iter()
            .map(|task| AchievementItem {
                id: new_id(),
                date,
                activity: task.label.clone(),
                hours: task.hours_or(default_hours),
                completed: true,
            })
            .collect();
        info!(tasks = items.len(), %date, "Applied classification");

        self.store.update(|s| {
            if let Some(entry) = s.journal.iter_mut().find(|e| e.id == id) {
                entry.date = date;
                if classification.risk_note.is_some() {
                    entry.risk_note = classification.risk_note;
                }
            }
            s.achievements.extend(items);
        });
    }

    pub fn delete_entry(&self, id: &str) -> Result<(), SessionError> {
        self.ensure_loaded()?;
        self.store
            .try_update(|s| {
                let index = s.journal.iter().position(|e| e.id == id)?;
                Some(s.journal.remove(index))
            })
            .map(|_| ())
            .ok_or_else(|| SessionError::UnknownEntity(format!("journal entry {}", id)))
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.store.read(|s| s.journal.clone())
    }

    // --- Achievements ---

    pub fn add_achievement(&self, label: &str, hours: f64) -> Result<AchievementItem, SessionError> {
        self.ensure_loaded()?;
        let activity = validate_task(label, hours)?;
        let item = AchievementItem {
            id: new_id(),
            date: self.clock.today(),
            activity,
            hours,
            completed: true,
        };
        self.store.update(|s| s.achievements.push(item.clone()));
        Ok(item)
    }

    pub fn update_achievement(&self, id: &str, label: &str, hours: f64) -> Result<(), SessionError> {
        self.ensure_loaded()?;
        let activity = validate_task(label, hours)?;
        self.store
            .try_update(|s| {
                let item = s.achievements.iter_mut().find(|a| a.id == id)?;
                item.activity = activity;
                item.hours = hours;
                Some(())
            })
            .ok_or_else(|| SessionError::UnknownEntity(format!("achievement {}", id)))
    }

    pub fn delete_achievement(&self, id: &str) -> Result<(), SessionError> {
        self.ensure_loaded()?;
        self.store
            .try_update(|s| {
                let index = s.achievements.iter().position(|a| a.id == id)?;
                Some(s.achievements.remove(index))
            })
            .map(|_| ())
            .ok_or_else(|| SessionError::UnknownEntity(format!("achievement {}", id)))
    }

    pub fn achievements_on(&self, date: NaiveDate) -> Vec<AchievementItem> {
        self.store
            .read(|s| s.achievements.iter().filter(|a| a.date == date).cloned().collect())
    }

    /// Total hours logged on `date`.
    pub fn hours_on(&self, date: NaiveDate) -> f64 {
        self.store.read(|s| {
            s.achievements
                .iter()
                .filter(|a| a.date == date)
                .map(|a| a.hours)
                .sum()
        })
    }

    // --- Habits ---

    pub fn add_habit(&self, name: &str) -> Result<HabitTrack, SessionError> {
        self.ensure_loaded()?;
        let habit = HabitTrack::new(new_id(), non_empty(name, "Habit name")?);
        self.store.update(|s| s.habits.push(habit.clone()));
        Ok(habit)
    }

    pub fn rename_habit(&self, id: &str, name: &str) -> Result<(), SessionError> {
        self.ensure_loaded()?;
        let name = non_empty(name, "Habit name")?;
        self.store
            .try_update(|s| {
                let habit = s.habits.iter_mut().find(|h| h.id == id)?;
                habit.name = name;
                Some(())
            })
            .ok_or_else(|| SessionError::UnknownEntity(format!("habit {}", id)))
    }

    pub fn delete_habit(&self, id: &str) -> Result<(), SessionError> {
        self.ensure_loaded()?;
        self.store
            .try_update(|s| {
                let index = s.habits.iter().position(|h| h.id == id)?;
                Some(s.habits.remove(index))
            })
            .map(|_| ())
            .ok_or_else(|| SessionError::UnknownEntity(format!("habit {}", id)))
    }

    /// Flip one day of a habit. Returns `false` without touching anything
    /// when the day is in the future, outside the cycle, or the habit does
    /// not exist.
    pub fn toggle_habit_day(&self, id: &str, cycle: u32, day: u32) -> Result<bool, SessionError> {
        self.ensure_loaded()?;
        if !calendar::is_writable(cycle, day, self.today_index()) {
            debug!(cycle, day, "Ignoring toggle of a day that is not writable");
            return Ok(false);
        }
        let toggled = self.store.try_update(|s| {
            let habit = s.habits.iter_mut().find(|h| h.id == id)?;
            habit.flip(cycle, day as usize);
            Some(())
        });
        Ok(toggled.is_some())
    }

    /// Completed days of a habit in `cycle`.
    pub fn cycle_completion(&self, id: &str, cycle: u32) -> Option<usize> {
        self.store
            .read(|s| s.habits.iter().find(|h| h.id == id).map(|h| h.completed_in(cycle)))
    }

    /// Cycle containing today.
    pub fn current_cycle(&self) -> u32 {
        calendar::cycle_index(self.today_index())
    }

    /// Ask the collaborator for a review of a started cycle.
    pub async fn analyze_cycle(&self, cycle: u32) -> Result<Gated<Option<String>>, SessionError> {
        self.ensure_loaded()?;
        if !calendar::is_cycle_open(cycle, self.today_index()) {
            debug!(cycle, "Cycle has not started, nothing to review");
            return Ok(Gated::Ran(None));
        }
        self.gated(GatedAction::AnalyzeCycle(cycle)).await
    }

    // --- Conversations ---

    /// Consultation turn. A successful reply is also filed in the journal as
    /// a diagnosis entry.
    pub async fn consult(
        &self,
        text: &str,
        image: Option<String>,
    ) -> Result<Gated<Option<String>>, SessionError> {
        self.ensure_loaded()?;
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return Err(SessionError::Validation("Message is empty".to_string()));
        }
        self.gated(GatedAction::Consult {
            text: text.to_string(),
            image,
        })
        .await
    }

    /// Diagnosis turn. A constitution directive in the reply updates the
    /// profile and is removed from the displayed text.
    pub async fn diagnose(&self, text: &str) -> Result<Gated<Option<String>>, SessionError> {
        self.ensure_loaded()?;
        let text = non_empty(text, "Message")?;
        self.gated(GatedAction::Diagnose(text)).await
    }

    /// Guided meditation turn.
    pub async fn meditate(&self, text: &str) -> Result<Gated<Option<String>>, SessionError> {
        self.ensure_loaded()?;
        let text = non_empty(text, "Message")?;
        self.gated(GatedAction::Meditate(text)).await
    }

    /// End the meditation session: summarise it into a journal entry and
    /// clear the surface. Returns `None` when there was nothing to record.
    pub async fn close_meditation(&self) -> Result<Option<JournalEntry>, SessionError> {
        self.ensure_loaded()?;
        let (transcript, profile) = self
            .store
            .read(|s| (s.conversations.meditation.clone(), s.profile.clone()));
        if transcript.is_empty() {
            return Ok(None);
        }

        let fallback = format!("Meditation session ({} messages)", transcript.len());
        let summary = match self.store.capability() {
            Some(capability) => {
                let context = ConversationContext::new(ConversePurpose::MeditationSummary, profile);
                match self
                    .collaborator
                    .converse(&capability, &transcript, &context)
                    .await
                {
                    Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
                    Ok(_) => fallback,
                    Err(e) => {
                        warn!(error = %e, "Meditation summary failed, using fallback");
                        fallback
                    }
                }
            }
            None => fallback,
        };

        let entry = JournalEntry::new(
            self.clock.today(),
            summary,
            EntryKind::Meditation,
            self.clock.now(),
        );
        self.store.update(|s| {
            s.journal.insert(0, entry.clone());
            s.conversations.meditation.clear();
        });

        let outcome = self.compactor.evaluate(&self.sync).await;
        debug!(?outcome, "Compaction check after meditation");
        Ok(Some(entry))
    }

    pub fn reset_conversation(&self, surface: Surface) -> Result<(), SessionError> {
        self.ensure_loaded()?;
        self.store.update(|s| s.conversations.get_mut(surface).clear());
        info!(%surface, "Conversation reset");
        Ok(())
    }

    pub fn conversation(&self, surface: Surface) -> Vec<ChatMessage> {
        self.store.read(|s| s.conversations.get(surface).to_vec())
    }

    // --- Capability ---

    /// Store a capability, flush it, then run the parked gated action once.
    pub async fn submit_capability(
        &self,
        secret: &str,
    ) -> Result<Option<ActionOutcome>, SessionError> {
        self.ensure_loaded()?;
        let capability = Capability::new(secret).ok_or_else(|| {
            SessionError::Validation("Capability must not be blank".to_string())
        })?;

        self.store
            .replace(Entity::Capability(Some(capability.clone())));
        if let Err(e) = self.sync.flush_now().await {
            warn!(error = %e, "Flush after capability change failed");
        }
        info!(account = %self.account, "Capability stored");

        match self.gate.submit() {
            Some(action) => Ok(Some(self.run(action, &capability).await)),
            None => Ok(None),
        }
    }

    pub fn dismiss_capability_prompt(&self) {
        self.gate.dismiss();
    }

    pub fn is_prompting_capability(&self) -> bool {
        self.gate.is_prompting()
    }

    pub async fn clear_capability(&self) -> Result<(), SessionError> {
        self.ensure_loaded()?;
        self.store.replace(Entity::Capability(None));
        self.sync.flush_now().await?;
        Ok(())
    }

    // --- Account lifecycle ---

    /// Drop all local state and delete the remote record.
    ///
    /// Local state goes first and any in-flight push is awaited, so nothing
    /// can recreate the record after the delete.
    pub async fn erase_account(&self) -> Result<(), SessionError> {
        self.store.reset(AccountState::default());
        self.sync.unload().await;
        self.gate.dismiss();
        self.remote.delete(&self.account).await?;
        info!(account = %self.account, "Account erased");
        Ok(())
    }

    // --- Internals ---

    fn ensure_loaded(&self) -> Result<(), SessionError> {
        if self.store.is_loaded() {
            Ok(())
        } else {
            Err(SessionError::NotLoaded)
        }
    }

    fn today_index(&self) -> u32 {
        calendar::day_of_year(self.clock.today())
    }

    async fn gated(&self, action: GatedAction) -> Result<Gated<Option<String>>, SessionError> {
        match self.gate.require(self.store.capability(), action) {
            Admission::Proceed(action, capability) => {
                Ok(Gated::Ran(self.run(action, &capability).await.into_reply()))
            }
            Admission::Suspended => {
                info!(account = %self.account, "Capability required, action parked");
                Ok(Gated::Suspended)
            }
        }
    }

    async fn run(&self, action: GatedAction, capability: &Capability) -> ActionOutcome {
        match action {
            GatedAction::Consult { text, image } => {
                ActionOutcome::Consulted(self.consult_with(capability, text, image).await)
            }
            GatedAction::Diagnose(text) => {
                ActionOutcome::Diagnosed(self.diagnose_with(capability, text).await)
            }
            GatedAction::Meditate(text) => {
                ActionOutcome::Meditated(self.meditate_with(capability, text).await)
            }
            GatedAction::AnalyzeCycle(cycle) => {
                ActionOutcome::CycleReviewed(self.analyze_with(capability, cycle).await)
            }
        }
    }

    /// Append a user message, ask for a reply and append it. Returns `None`
    /// when the collaborator fails.
    async fn exchange(
        &self,
        capability: &Capability,
        surface: Surface,
        purpose: ConversePurpose,
        text: &str,
        image: Option<String>,
    ) -> Option<String> {
        let mut message = ChatMessage::new(Role::User, text, self.clock.now());
        message.image = image;
        let (history, profile) = self.store.update(|s| {
            let history = s.conversations.get_mut(surface);
            history.push(message);
            (history.clone(), s.profile.clone())
        });

        let context = ConversationContext::new(purpose, profile);
        match self
            .collaborator
            .converse(capability, &history, &context)
            .await
        {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(%surface, error = %e, "Collaborator reply failed");
                None
            }
        }
    }

    fn append_reply(&self, surface: Surface, reply: &str) {
        let message = ChatMessage::new(Role::Assistant, reply, self.clock.now());
        self.store
            .update(|s| s.conversations.get_mut(surface).push(message));
    }

    async fn consult_with(
        &self,
        capability: &Capability,
        text: String,
        image: Option<String>,
    ) -> Option<String> {
        let reply = self
            .exchange(
                capability,
                Surface::Consultation,
                ConversePurpose::Consultation,
                &text,
                image.clone(),
            )
            .await?;
        self.append_reply(Surface::Consultation, &reply);

        let record = JournalEntry::new(
            self.clock.today(),
            format!("Symptoms:\n{}\n\nAdvice:\n{}", text, reply),
            EntryKind::Diagnosis,
            self.clock.now(),
        )
        .with_image(image);
        self.store.update(|s| s.journal.insert(0, record));

        let outcome = self.compactor.evaluate(&self.sync).await;
        debug!(?outcome, "Compaction check after consultation");
        Some(reply)
    }

    async fn diagnose_with(&self, capability: &Capability, text: String) -> Option<String> {
        let reply = self
            .exchange(
                capability,
                Surface::Diagnosis,
                ConversePurpose::Diagnosis,
                &text,
                None,
            )
            .await?;
        let (display, constitution) = parse::profile_directive(&reply);
        self.append_reply(Surface::Diagnosis, &display);

        if let Some(constitution) = constitution {
            info!(%constitution, "Diagnosis updated constitution");
            self.store
                .update(|s| s.profile.constitution = constitution);
            if let Err(e) = self.sync.flush_now().await {
                warn!(error = %e, "Flush after diagnosis failed");
            }
        }
        Some(display)
    }

    async fn meditate_with(&self, capability: &Capability, text: String) -> Option<String> {
        let reply = self
            .exchange(
                capability,
                Surface::Meditation,
                ConversePurpose::Meditation,
                &text,
                None,
            )
            .await?;
        self.append_reply(Surface::Meditation, &reply);
        Some(reply)
    }

    async fn analyze_with(&self, capability: &Capability, cycle: u32) -> Option<String> {
        let today = self.clock.today();
        let span = calendar::cycle_span(cycle, today.year());
        let (notes, profile) = self.store.read(|s| {
            let mut notes = format!(
                "Cycle {} ({})\n",
                cycle,
                calendar::date_range_label(cycle, today.year())
            );
            for habit in &s.habits {
                notes.push_str(&format!(
                    "- {}: {}/{} days\n",
                    habit.name,
                    habit.completed_in(cycle),
                    calendar::CYCLE_LENGTH
                ));
            }
            if let Some((start, end)) = span {
                for entry in s
                    .journal
                    .iter()
                    .filter(|e| e.date >= start && e.date <= end)
                {
                    notes.push_str(&format!("{} {}\n", entry.date, entry.content));
                }
            }
            (notes, s.profile.clone())
        });

        let context = ConversationContext::new(ConversePurpose::CycleReview, profile).with_notes(notes);
        match self.collaborator.converse(capability, &[], &context).await {
            Ok(review) => Some(review),
            Err(e) => {
                warn!(cycle, error = %e, "Cycle review failed");
                None
            }
        }
    }
}

impl ActionOutcome {
    fn into_reply(self) -> Option<String> {
        match self {
            ActionOutcome::Consulted(reply)
            | ActionOutcome::Diagnosed(reply)
            | ActionOutcome::Meditated(reply)
            | ActionOutcome::CycleReviewed(reply) => reply,
        }
    }
}

/// Create the remote record for a new account.
///
/// An existing account is reported as a validation message and not retried.
pub async fn register(remote: &dyn RemoteStore, account: &str) -> Result<(), SessionError> {
    let account = non_empty(account, "Account name")?;
    match remote.insert(&account, &AccountRecord::fresh(&account)).await {
        Ok(()) => {
            info!(%account, "Account registered");
            Ok(())
        }
        Err(StoreError::Duplicate(_)) => Err(SessionError::Validation(format!(
            "Account '{}' already exists",
            account
        ))),
        Err(e) => Err(e.into()),
    }
}

fn non_empty(value: &str, what: &str) -> Result<String, SessionError> {
    let value = value.trim();
    if value.is_empty() {
        Err(SessionError::Validation(format!("{} must not be empty", what)))
    } else {
        Ok(value.to_string())
    }
}

fn validate_task(label: &str, hours: f64) -> Result<String, SessionError> {
    if !hours.is_finite() || hours <= 0.0 {
        return Err(SessionError::Validation(
            "Hours must be greater than zero".to_string(),
        ));
    }
    non_empty(label, "Activity")
}
