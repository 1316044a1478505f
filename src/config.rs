//! Engine configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub collaborator: CollaboratorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from a TOML file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account the session is opened for
    #[serde(default = "default_account")]
    pub id: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            id: default_account(),
        }
    }
}

/// Persistence synchronizer tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Quiet period after the last mutation before a push
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Total load attempts on connectivity failures
    #[serde(default = "default_load_attempts")]
    pub load_attempts: u32,

    /// Delay between load attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Delay before the first load attempt, gives a sleeping store time to wake
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            load_attempts: default_load_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            initial_delay_ms: default_initial_delay_ms(),
        }
    }
}

/// Journal compaction policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Unsummarized entry count that triggers compaction
    #[serde(default = "default_threshold")]
    pub threshold: usize,

    /// Hours assigned to extracted tasks with no usable duration
    #[serde(default = "default_task_hours")]
    pub default_task_hours: f64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            default_task_hours: default_task_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    #[serde(default = "default_collaborator_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            base_url: default_collaborator_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Which remote store backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
    Rest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// SQLite database file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// REST endpoint base, e.g. `https://<project>.supabase.co/rest/v1`
    #[serde(default)]
    pub url: Option<String>,

    /// REST anon key
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_table")]
    pub table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
            url: None,
            api_key: None,
            table: default_table(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Defaults
fn default_account() -> String { "guest".to_string() }
fn default_debounce_ms() -> u64 { 3000 }
fn default_load_attempts() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 2000 }
fn default_initial_delay_ms() -> u64 { 500 }
fn default_threshold() -> usize { 7 }
fn default_task_hours() -> f64 { 0.5 }
fn default_collaborator_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_model() -> String { "gemini-3-flash-preview".to_string() }
fn default_timeout_secs() -> u64 { 60 }
fn default_backend() -> StoreBackend { StoreBackend::Sqlite }
fn default_store_path() -> PathBuf { PathBuf::from("wellness.db") }
fn default_table() -> String { "app_users".to_string() }
fn default_log_level() -> String { "wellness_sync=info".to_string() }
