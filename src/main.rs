//! wellness-sync: command-line front end for the journal sync engine
//!
//! Each invocation opens one account, loads it from the configured remote
//! store, runs a single command and flushes before exiting.

mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wellness_sync::config::StoreBackend;
use wellness_sync::{
    register, Collaborator, Config, GeminiCollaborator, MemoryStore, RemoteStore, RestStore,
    Session, SqliteStore, SystemClock,
};

use cli::Commands;

#[derive(Parser)]
#[command(name = "wellness-sync")]
#[command(about = "State sync and journal retention for a personal wellness journal")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wellness-sync.toml")]
    config: PathBuf,

    /// Account to open (overrides config file)
    #[arg(short, long, env = "WELLNESS_ACCOUNT")]
    account: Option<String>,

    /// SQLite database path (overrides config file)
    #[arg(long, env = "WELLNESS_STORE_PATH")]
    store_path: Option<PathBuf>,

    /// REST store API key (overrides config file)
    #[arg(long, env = "WELLNESS_STORE_KEY", hide_env_values = true)]
    store_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // Apply CLI overrides
    if let Some(account) = cli.account {
        config.account.id = account;
    }
    if let Some(path) = cli.store_path {
        config.store.path = path;
    }
    if let Some(key) = cli.store_key {
        config.store.api_key = Some(key);
    }

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!(account = %config.account.id, backend = ?config.store.backend, "Starting wellness-sync");

    let remote = open_remote(&config)?;

    if let Commands::Register = cli.command {
        register(remote.as_ref(), &config.account.id).await?;
        println!("Registered {}", config.account.id);
        return Ok(());
    }

    let collaborator: Arc<dyn Collaborator> = Arc::new(GeminiCollaborator::new(
        config.collaborator.base_url.clone(),
        config.collaborator.model.clone(),
        Duration::from_secs(config.collaborator.timeout_secs),
    )?);

    let session = Session::new(
        config.account.id.clone(),
        remote,
        collaborator,
        Arc::new(SystemClock),
        &config,
    );
    session.load().await?;

    let output = cli::execute_command(&session, cli.command).await?;
    if session.is_loaded() {
        session.flush().await?;
    }
    print!("{}", output);

    Ok(())
}

fn open_remote(config: &Config) -> anyhow::Result<Arc<dyn RemoteStore>> {
    let store = &config.store;
    let remote: Arc<dyn RemoteStore> = match store.backend {
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&store.path)?),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Rest => {
            let url = store
                .url
                .clone()
                .context("store.url is required for the rest backend")?;
            let key = store
                .api_key
                .clone()
                .context("store.api_key is required for the rest backend")?;
            Arc::new(RestStore::new(
                url,
                store.table.clone(),
                key,
                Duration::from_secs(config.collaborator.timeout_secs),
            )?)
        }
    };
    Ok(remote)
}
