//! PostgREST-style remote store.
//!
//! Talks to a table (default `app_users`) keyed by `username`, one row per
//! account with one JSON column per record field. Error codes are mapped
//! onto the store taxonomy:
//! - `PGRST116` (zero rows for a single-object read) -> `NotFound`
//! - connect/timeout errors, HTTP 5xx/408/429, `57014` -> `Transient`
//! - HTTP 409, `23505` -> `Duplicate`
//! - anything else -> `Permanent`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::RemoteStore;
use crate::error::StoreError;
use crate::models::AccountRecord;

const KEY_COLUMN: &str = "username";
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

pub struct RestStore {
    client: Client,
    base_url: String,
    table: String,
    api_key: String,
}

/// Error body returned by PostgREST.
#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl RestStore {
    pub fn new(
        base_url: impl Into<String>,
        table: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Permanent(format!("building HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            table: table.into(),
            api_key: api_key.into(),
        })
    }

    fn table_url(&self) -> String {
        format!("{}/{}", self.base_url, self.table)
    }

    fn request(&self, method: reqwest::Method, account: Option<&str>) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, self.table_url())
            .header("apikey", &self.api_key)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key));
        if let Some(account) = account {
            builder = builder.query(&[(KEY_COLUMN, format!("eq.{}", account))]);
        }
        builder
    }

    fn row(account: &str, record: &AccountRecord) -> Result<serde_json::Value, StoreError> {
        let mut row = serde_json::to_value(record)?;
        if let Some(obj) = row.as_object_mut() {
            obj.insert(KEY_COLUMN.to_string(), serde_json::Value::from(account));
        }
        Ok(row)
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn get(&self, account: &str) -> Result<AccountRecord, StoreError> {
        let response = self
            .request(reqwest::Method::GET, Some(account))
            .query(&[("select", "*")])
            .header(header::ACCEPT, SINGLE_OBJECT)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check(response).await?;
        let record = response
            .json::<AccountRecord>()
            .await
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        debug!(account, entries = record.journal_entries.len(), "Fetched account record");
        Ok(record)
    }

    async fn update(&self, account: &str, record: &AccountRecord) -> Result<(), StoreError> {
        let row = Self::row(account, record)?;
        let response = self
            .request(reqwest::Method::POST, None)
            .query(&[("on_conflict", KEY_COLUMN)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row)
            .send()
            .await
            .map_err(transport_error)?;
        check(response).await?;
        Ok(())
    }

    async fn insert(&self, account: &str, record: &AccountRecord) -> Result<(), StoreError> {
        let row = Self::row(account, record)?;
        let response = self
            .request(reqwest::Method::POST, None)
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await
            .map_err(transport_error)?;
        match check(response).await {
            Err(StoreError::Duplicate(_)) => Err(StoreError::Duplicate(account.to_string())),
            other => other.map(|_| ()),
        }
    }

    async fn delete(&self, account: &str) -> Result<(), StoreError> {
        let response = self
            .request(reqwest::Method::DELETE, Some(account))
            .send()
            .await
            .map_err(transport_error)?;
        check(response).await?;
        Ok(())
    }
}

fn transport_error(e: reqwest::Error) -> StoreError {
    // Anything that failed before a status line arrived is connectivity-class.
    StoreError::Transient(e.to_string())
}

/// Pass successful responses through, classify the rest.
async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let api: ApiError = serde_json::from_str(&body).unwrap_or_default();
    let message = api.message.clone().unwrap_or_else(|| body.clone());
    let err = classify(status, api.code.as_deref(), message);
    warn!(%status, code = ?api.code, error = %err, "Remote store request failed");
    Err(err)
}

fn classify(status: StatusCode, code: Option<&str>, message: String) -> StoreError {
    match code {
        Some("PGRST116") => return StoreError::NotFound,
        Some("57014") => return StoreError::Transient(message),
        Some("23505") => return StoreError::Duplicate(message),
        _ => {}
    }

    if status == StatusCode::CONFLICT {
        StoreError::Duplicate(message)
    } else if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        StoreError::Transient(format!("HTTP {}: {}", status, message))
    } else {
        StoreError::Permanent(format!("HTTP {}: {}", status, message))
    }
}
