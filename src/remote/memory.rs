//! In-process remote store.
//!
//! Backs tests and the `memory` backend. Failures can be scripted per
//! operation and every call is counted.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::RemoteStore;
use crate::error::StoreError;
use crate::models::AccountRecord;

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, AccountRecord>>,
    get_failures: Mutex<VecDeque<StoreError>>,
    update_failures: Mutex<VecDeque<StoreError>>,
    get_calls: AtomicU32,
    update_calls: AtomicU32,
    pushes: Mutex<Vec<AccountRecord>>,
    update_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record.
    pub fn with_record(self, account: &str, record: AccountRecord) -> Self {
        self.put(account, record);
        self
    }

    /// Hold every `update` for `delay` before it is applied.
    pub fn with_update_delay(mut self, delay: Duration) -> Self {
        self.update_delay = Some(delay);
        self
    }

    /// Queue errors returned by the next `get` calls, in order.
    pub fn fail_gets(self, errors: impl IntoIterator<Item = StoreError>) -> Self {
        lock(&self.get_failures).extend(errors);
        self
    }

    /// Queue errors returned by the next `update` calls, in order.
    pub fn fail_updates(&self, errors: impl IntoIterator<Item = StoreError>) {
        lock(&self.update_failures).extend(errors);
    }

    pub fn put(&self, account: &str, record: AccountRecord) {
        lock(&self.records).insert(account.to_string(), record);
    }

    pub fn record(&self, account: &str) -> Option<AccountRecord> {
        lock(&self.records).get(account).cloned()
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> u32 {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Every record successfully pushed through `update`, oldest first.
    pub fn pushes(&self) -> Vec<AccountRecord> {
        lock(&self.pushes).clone()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, account: &str) -> Result<AccountRecord, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.get_failures).pop_front() {
            return Err(err);
        }
        lock(&self.records)
            .get(account)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, account: &str, record: &AccountRecord) -> Result<(), StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.update_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = lock(&self.update_failures).pop_front() {
            return Err(err);
        }
        lock(&self.records).insert(account.to_string(), record.clone());
        lock(&self.pushes).push(record.clone());
        Ok(())
    }

    async fn insert(&self, account: &str, record: &AccountRecord) -> Result<(), StoreError> {
        let mut records = lock(&self.records);
        if records.contains_key(account) {
            return Err(StoreError::Duplicate(account.to_string()));
        }
        records.insert(account.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, account: &str) -> Result<(), StoreError> {
        lock(&self.records).remove(account);
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
