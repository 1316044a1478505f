//! wellness-sync: state synchronization and retention engine for a personal
//! wellness journal
//!
//! Holds one account's state in memory and keeps it in step with a remote
//! store:
//! - Local state store with whole-entity replacement and a loaded flag
//! - Debounced whole-record pushes that always carry the latest state
//! - Initial load with bounded retries and fresh-account seeding
//! - Journal compaction into summaries through a text collaborator
//! - A capability gate in front of every collaborator-backed action
//! - The 10-day cycle calendar used by habit tracking
//!
//! ## Layout
//!
//! ```text
//! calendar      cycle arithmetic, Clock
//! models        entities and the remote record shape
//! state         LocalStateStore
//! remote        RemoteStore + memory / sqlite / rest backends
//! collaborator  Collaborator + gemini / mock backends, output parsing
//! sync          Synchronizer, phases, status
//! retention     Compactor
//! gate          CapabilityGate
//! session       Session facade
//! ```

pub mod calendar;
pub mod collaborator;
pub mod config;
pub mod error;
pub mod gate;
pub mod models;
pub mod remote;
pub mod retention;
pub mod session;
pub mod state;
pub mod sync;

// Re-exports
pub use calendar::{Clock, FixedClock, SystemClock};
pub use collaborator::{Collaborator, GeminiCollaborator, MockCollaborator};
pub use config::Config;
pub use error::{CollaboratorError, SessionError, StoreError};
pub use gate::{CapabilityGate, Gated};
pub use remote::{MemoryStore, RemoteStore, RestStore, SqliteStore};
pub use retention::{CompactionOutcome, Compactor};
pub use session::{register, ActionOutcome, GatedAction, Session};
pub use state::{AccountState, LocalStateStore};
pub use sync::{SyncPhase, SyncStatus, Synchronizer};
