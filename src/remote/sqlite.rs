//! SQLite-backed remote store
//!
//! One row per account holding the JSON-encoded record. `update` is an
//! upsert so the last push always wins.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::RemoteStore;
use crate::error::StoreError;
use crate::models::AccountRecord;

pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Permanent(format!("creating {}: {}", parent.display(), e)))?;
        }
        let db = Connection::open(path)?;

        // Enable WAL mode for concurrent read access
        db.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(&db)?;

        info!(path = %path.display(), "SQLite store initialized");
        Ok(Self { db: Mutex::new(db) })
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Connection::open_in_memory()?;
        Self::init(&db)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn init(db: &Connection) -> Result<(), StoreError> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                account_id TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );",
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteStore for SqliteStore {
    async fn get(&self, account: &str) -> Result<AccountRecord, StoreError> {
        let json: Option<String> = self
            .conn()
            .query_row(
                "SELECT record FROM accounts WHERE account_id = ?1",
                [account],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(StoreError::NotFound),
        }
    }

    async fn update(&self, account: &str, record: &AccountRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        self.conn().execute(
            "INSERT INTO accounts (account_id, record, updated_at)
             VALUES (?1, ?2, strftime('%s', 'now'))
             ON CONFLICT(account_id) DO UPDATE SET record = ?2, updated_at = strftime('%s', 'now')",
            params![account, json],
        )?;
        debug!(account, bytes = json.len(), "Saved account record");
        Ok(())
    }

    async fn insert(&self, account: &str, record: &AccountRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        self.conn()
            .execute(
                "INSERT INTO accounts (account_id, record) VALUES (?1, ?2)",
                params![account, json],
            )
            .map_err(|e| match StoreError::from(e) {
                StoreError::Duplicate(_) => StoreError::Duplicate(account.to_string()),
                other => other,
            })?;
        Ok(())
    }

    async fn delete(&self, account: &str) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM accounts WHERE account_id = ?1", [account])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.get("ghost").await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_update_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("wellness.db")).unwrap();

        let mut record = AccountRecord::fresh("mei");
        store.update("mei", &record).await.unwrap();

        record.profile.as_mut().unwrap().goals = "walk daily".into();
        store.update("mei", &record).await.unwrap();

        let loaded = store.get("mei").await.unwrap();
        assert_eq!(loaded.profile.unwrap().goals, "walk daily");
    }

    #[tokio::test]
    async fn test_insert_twice_is_duplicate() {
        let store = SqliteStore::in_memory().unwrap();
        let record = AccountRecord::fresh("mei");
        store.insert("mei", &record).await.unwrap();
        assert_eq!(
            store.insert("mei", &record).await,
            Err(StoreError::Duplicate("mei".into()))
        );
    }

    #[tokio::test]
    async fn test_delete_then_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert("mei", &AccountRecord::fresh("mei")).await.unwrap();
        store.delete("mei").await.unwrap();
        assert_eq!(store.get("mei").await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wellness.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.update("mei", &AccountRecord::fresh("mei")).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.get("mei").await.is_ok());
    }
}
