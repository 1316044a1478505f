//! CLI commands for working with one account from the terminal.

use std::fmt::Write;

use chrono::{Datelike, NaiveDate};
use clap::{Subcommand, ValueEnum};

use wellness_sync::calendar::{self, CYCLES_PER_YEAR, CYCLE_LENGTH};
use wellness_sync::models::EntryKind;
use wellness_sync::{CompactionOutcome, Gated, Session};

const NEEDS_CAPABILITY: &str =
    "A capability is required. Run `capability set <secret>` to store one and continue.";

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show sync status and entity counts
    Status,

    /// Journal entries
    #[command(subcommand)]
    Journal(JournalCommands),

    /// Logged tasks
    #[command(subcommand)]
    Achievement(AchievementCommands),

    /// Habit tracks
    #[command(subcommand)]
    Habit(HabitCommands),

    /// Show the current cycle
    Calendar,

    /// Collaborator capability
    #[command(subcommand)]
    Capability(CapabilityCommands),

    /// Ask the wellness companion; the exchange is filed in the journal
    Consult { text: String },

    /// One turn of the constitution assessment
    Diagnose { text: String },

    /// Meditation guide
    #[command(subcommand)]
    Meditate(MeditateCommands),

    /// Review a habit cycle (default: current)
    Review {
        #[arg(short, long)]
        cycle: Option<u32>,
    },

    /// Compact the journal if it is over the threshold
    Compact,

    /// Create the remote record for the account
    Register,

    /// Delete the account's remote record
    Erase {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum JournalCommands {
    /// Record an entry dated today
    Add {
        text: String,
        #[arg(short, long, value_enum, default_value = "general")]
        kind: KindArg,
    },
    /// List recent entries
    List {
        #[arg(short, long, default_value = "10")]
        count: usize,
    },
    /// Delete an entry
    Delete { id: String },
}

#[derive(Debug, Subcommand)]
pub enum AchievementCommands {
    /// Log a task for today
    Add { label: String, hours: f64 },
    /// List tasks for a day (default today)
    List {
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Debug, Subcommand)]
pub enum HabitCommands {
    /// Add a habit track
    Add { name: String },
    /// Toggle one day (0-9) of a cycle
    Toggle {
        id: String,
        day: u32,
        /// Cycle index (default: current)
        #[arg(short, long)]
        cycle: Option<u32>,
    },
    /// Show habit rows for a cycle
    Show {
        #[arg(short, long)]
        cycle: Option<u32>,
    },
}

#[derive(Debug, Subcommand)]
pub enum MeditateCommands {
    /// Send one message to the guide
    Say { text: String },
    /// End the session and record it in the journal
    End,
}

#[derive(Debug, Subcommand)]
pub enum CapabilityCommands {
    /// Store the capability
    Set { secret: String },
    /// Remove the stored capability
    Clear,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    General,
    Mood,
    Diet,
    Work,
}

impl From<KindArg> for EntryKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::General => EntryKind::General,
            KindArg::Mood => EntryKind::Mood,
            KindArg::Diet => EntryKind::Diet,
            KindArg::Work => EntryKind::Work,
        }
    }
}

/// Run a command against a loaded session and render its output.
pub async fn execute_command(session: &Session, cmd: Commands) -> anyhow::Result<String> {
    let mut out = String::new();

    match cmd {
        Commands::Status => {
            let state = session.snapshot();
            writeln!(out, "Account: {}", session.account())?;
            writeln!(out, "Status: {}", session.status())?;
            writeln!(
                out,
                "Journal: {} entries ({} unsummarized)",
                state.journal.len(),
                state.unsummarized_count()
            )?;
            writeln!(out, "Achievements: {}", state.achievements.len())?;
            writeln!(out, "Habits: {}", state.habits.len())?;
            writeln!(
                out,
                "Capability: {}",
                if state.capability.is_some() { "set" } else { "not set" }
            )?;
        }

        Commands::Journal(JournalCommands::Add { text, kind }) => {
            let entry = session.record_entry(&text, kind.into(), None).await?;
            writeln!(out, "Recorded {} on {}", entry.id, entry.date)?;
            if let Some(note) = &entry.risk_note {
                writeln!(out, "Note: {}", note)?;
            }
        }
        Commands::Journal(JournalCommands::List { count }) => {
            for entry in session.journal().iter().take(count) {
                writeln!(
                    out,
                    "{}  {}  [{:?}]  {}",
                    entry.id, entry.date, entry.kind, entry.content
                )?;
            }
        }
        Commands::Journal(JournalCommands::Delete { id }) => {
            session.delete_entry(&id)?;
            writeln!(out, "Deleted {}", id)?;
        }

        Commands::Achievement(AchievementCommands::Add { label, hours }) => {
            let item = session.add_achievement(&label, hours)?;
            writeln!(out, "Logged {} ({}h)", item.activity, item.hours)?;
        }
        Commands::Achievement(AchievementCommands::List { date }) => {
            let date = date.unwrap_or_else(|| session.today());
            for item in session.achievements_on(date) {
                writeln!(out, "{}  {:>5.1}h  {}", item.id, item.hours, item.activity)?;
            }
            writeln!(out, "Total: {:.1}h", session.hours_on(date))?;
        }

        Commands::Habit(HabitCommands::Add { name }) => {
            let habit = session.add_habit(&name)?;
            writeln!(out, "Added habit {} ({})", habit.name, habit.id)?;
        }
        Commands::Habit(HabitCommands::Toggle { id, day, cycle }) => {
            let cycle = cycle.unwrap_or_else(|| session.current_cycle());
            if session.toggle_habit_day(&id, cycle, day)? {
                writeln!(out, "Toggled {} cycle {} day {}", id, cycle, day)?;
            } else {
                writeln!(out, "Day {} of cycle {} cannot be changed", day, cycle)?;
            }
        }
        Commands::Habit(HabitCommands::Show { cycle }) => {
            let cycle = cycle.unwrap_or_else(|| session.current_cycle());
            for habit in session.snapshot().habits {
                let row: String = (0..CYCLE_LENGTH)
                    .map(|d| match habit.history.get(&cycle) {
                        Some(days) if days[d as usize] => 'x',
                        _ => '.',
                    })
                    .collect();
                writeln!(
                    out,
                    "{:<28} {}  {}/{}",
                    habit.name,
                    row,
                    habit.completed_in(cycle),
                    CYCLE_LENGTH
                )?;
            }
        }

        Commands::Calendar => {
            let today = session.today();
            let cycle = session.current_cycle();
            writeln!(
                out,
                "Day {} of {}, cycle {} of {} ({})",
                calendar::day_of_year(today),
                today.year(),
                cycle,
                CYCLES_PER_YEAR,
                calendar::date_range_label(cycle, today.year())
            )?;
        }

        Commands::Capability(CapabilityCommands::Set { secret }) => {
            // Each invocation is a fresh session, so nothing is parked here
            session.submit_capability(&secret).await?;
            writeln!(out, "Capability stored")?;
        }
        Commands::Capability(CapabilityCommands::Clear) => {
            session.clear_capability().await?;
            writeln!(out, "Capability cleared")?;
        }

        Commands::Consult { text } => {
            render_reply(&mut out, session.consult(&text, None).await?)?;
        }
        Commands::Diagnose { text } => {
            render_reply(&mut out, session.diagnose(&text).await?)?;
        }
        Commands::Meditate(MeditateCommands::Say { text }) => {
            render_reply(&mut out, session.meditate(&text).await?)?;
        }
        Commands::Meditate(MeditateCommands::End) => match session.close_meditation().await? {
            Some(entry) => writeln!(out, "Recorded: {}", entry.content)?,
            None => writeln!(out, "No meditation in progress")?,
        },
        Commands::Review { cycle } => {
            let cycle = cycle.unwrap_or_else(|| session.current_cycle());
            match session.analyze_cycle(cycle).await? {
                Gated::Ran(Some(review)) => writeln!(out, "{}", review)?,
                Gated::Ran(None) => writeln!(out, "No review for cycle {}", cycle)?,
                Gated::Suspended => writeln!(out, "{}", NEEDS_CAPABILITY)?,
            }
        }

        Commands::Compact => match session.compact().await? {
            CompactionOutcome::BelowThreshold { unsummarized } => {
                writeln!(out, "Nothing to compact ({} unsummarized)", unsummarized)?
            }
            CompactionOutcome::NoCapability => {
                writeln!(out, "Compaction needs a capability")?
            }
            CompactionOutcome::AlreadyRunning => writeln!(out, "Compaction already running")?,
            CompactionOutcome::Compacted {
                summarized,
                reclassified,
            } => writeln!(
                out,
                "Compacted {} entries{}",
                summarized,
                if reclassified { ", constitution updated" } else { "" }
            )?,
            CompactionOutcome::Failed(e) => writeln!(out, "Compaction failed: {}", e)?,
        },

        Commands::Erase { yes } => {
            if !yes {
                anyhow::bail!("Refusing to erase without --yes");
            }
            session.erase_account().await?;
            writeln!(out, "Account {} erased", session.account())?;
        }

        Commands::Register => {
            anyhow::bail!("register runs before the session is opened");
        }
    }

    Ok(out)
}

fn render_reply(out: &mut String, reply: Gated<Option<String>>) -> std::fmt::Result {
    match reply {
        Gated::Ran(Some(text)) => writeln!(out, "{}", text),
        Gated::Ran(None) => writeln!(out, "The companion did not answer, try again later"),
        Gated::Suspended => writeln!(out, "{}", NEEDS_CAPABILITY),
    }
}
