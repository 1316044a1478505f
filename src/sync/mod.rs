//! Persistence synchronizer
//!
//! Bridges the local state store and the remote store: initial load with
//! bounded retries, debounced whole-record pushes, immediate flushes, and
//! the tri-state status surface.

pub mod status;
pub mod synchronizer;

pub use status::{SyncPhase, SyncStatus};
pub use synchronizer::Synchronizer;
