//! Remote store contract
//!
//! The synchronizer only talks to a [`RemoteStore`]. Backends:
//! - `MemoryStore` - in-process, with scripted failures for tests
//! - `SqliteStore` - single-file database
//! - `RestStore` - PostgREST-style HTTP table
//!
//! Every backend must keep [`StoreError::NotFound`] distinct from
//! connectivity failures: the first seeds a fresh account, the second is
//! retried.

pub mod memory;
pub mod rest;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::AccountRecord;

pub use memory::MemoryStore;
pub use rest::RestStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the full record for an account.
    async fn get(&self, account: &str) -> Result<AccountRecord, StoreError>;

    /// Overwrite the record for an account. Last writer wins.
    async fn update(&self, account: &str, record: &AccountRecord) -> Result<(), StoreError>;

    /// Create the record for a new account. Fails with `Duplicate` if one exists.
    async fn insert(&self, account: &str, record: &AccountRecord) -> Result<(), StoreError>;

    async fn delete(&self, account: &str) -> Result<(), StoreError>;
}
