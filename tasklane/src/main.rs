//! `tasklane`: personal task tracker with live sync.
//!
//! Each invocation signs a principal in, waits for the first snapshot of
//! their tasks, runs one command, and for mutations waits until the store's
//! snapshot confirms the change. Configuration via CLI flags, environment
//! variables, or config file (`~/.config/tasklane/config.toml`).
//!
//! ```bash
//! # Resume (or start) the anonymous session and list tasks
//! cargo run --bin tasklane
//!
//! # Act as a named principal
//! cargo run --bin tasklane -- --principal alice add "Buy milk" -d "2 litres"
//! TASKLANE_PRINCIPAL=alice cargo run --bin tasklane -- list --filter active
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use tasklane::config::{CliArgs, ClientConfig, Command, ConfigError};
use tasklane::identity::{IdentityError, LocalIdentity};
use tasklane::store::StoreError;
use tasklane::store::memory::MemoryStore;
use tasklane::sync::{SyncError, TaskSync};
use tasklane::ui;
use tasklane_proto::{Filter, PrincipalId, TaskId};

/// How often `watch` re-reads the data file for changes made elsewhere.
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors surfaced to the user by the binary.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not open task store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("tasks did not load: {0}")]
    NotReady(String),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Logs go to a file so stdout carries only command output.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let result = match ClientConfig::load(&cli) {
        Ok(config) => run(cli.command.clone().unwrap_or_default(), &config).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging via `tracing-appender`.
///
/// Returns a guard that must be held until the program exits to ensure
/// all buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("tasklane.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Brings the sync model up, runs `command`, and tears the model down.
async fn run(command: Command, config: &ClientConfig) -> Result<(), CliError> {
    let store = MemoryStore::open(&config.data_file)?;
    let identity = LocalIdentity::new();
    let sync = TaskSync::spawn(store.clone(), &identity, config.to_sync_config());

    match &config.principal {
        Some(principal) => identity.sign_in(PrincipalId::new(principal.trim())),
        None => {
            identity.restore_session(&config.session_file)?;
        }
    }

    tracing::info!(?command, "tasklane starting");

    let result = match sync.wait_until_ready(config.ready_timeout).await {
        Ok(_) => execute(&sync, &store, command, config).await,
        Err(_) => {
            let reason = sync
                .view()
                .error
                .unwrap_or_else(|| "timed out waiting for the first snapshot".to_string());
            Err(CliError::NotReady(reason))
        }
    };

    sync.shutdown().await;
    result
}

async fn execute(
    sync: &TaskSync<MemoryStore>,
    store: &MemoryStore,
    command: Command,
    config: &ClientConfig,
) -> Result<(), CliError> {
    let fmt = config.timestamp_format.as_str();

    match command {
        Command::List { filter, json } => {
            let view = sync.view();
            if json {
                println!("{}", serde_json::to_string_pretty(&view.filtered(filter))?);
            } else {
                println!("{}", ui::render_counts(&view.counts()));
                println!("{}", ui::render_list(&view.tasks, filter, fmt));
            }
        }
        Command::Add { title, description } => {
            let id = sync.add(&title, &description).await?;
            confirm(sync, config, |v| v.find(&id).is_some()).await;
            println!("Added {id}");
        }
        Command::Toggle { id } => {
            let id = TaskId::new(id);
            let expected = sync.view().find(&id).map(|t| t.status.toggled());
            sync.toggle(&id).await?;
            confirm(sync, config, |v| v.find(&id).map(|t| t.status) == expected).await;
            if let Some(status) = expected {
                println!("Marked {id} {status}");
            }
        }
        Command::Edit {
            id,
            title,
            description,
        } => {
            let id = TaskId::new(id);
            let title = title.trim().to_string();
            sync.edit(&id, &title, &description).await?;
            confirm(sync, config, |v| v.find(&id).is_some_and(|t| t.title == title)).await;
            println!("Updated {id}");
        }
        Command::Remove { id } => {
            let id = TaskId::new(id);
            sync.remove(&id).await?;
            confirm(sync, config, |v| v.find(&id).is_none()).await;
            println!("Removed {id}");
        }
        Command::Stats => {
            println!("{}", ui::render_counts(&sync.view().counts()));
        }
        Command::Watch { filter } => watch(sync, store, filter, fmt).await,
    }
    Ok(())
}

/// Waits for the snapshot that reflects a successful mutation.
async fn confirm(
    sync: &TaskSync<MemoryStore>,
    config: &ClientConfig,
    predicate: impl FnMut(&tasklane::sync::TaskView) -> bool,
) {
    if sync.wait_for(config.ready_timeout, predicate).await.is_none() {
        tracing::warn!("mutation accepted but no confirming snapshot arrived");
    }
}

/// Prints the view every time it is republished, until Ctrl-C.
///
/// The data file is polled so mutations made by other `tasklane`
/// processes show up as well.
async fn watch(sync: &TaskSync<MemoryStore>, store: &MemoryStore, filter: Filter, fmt: &str) {
    let mut rx = sync.watch_view();
    let mut poll = tokio::time::interval(WATCH_POLL_INTERVAL);
    println!("{}\n", ui::render_view(&rx.borrow_and_update(), filter, fmt));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = poll.tick() => {
                if let Err(e) = store.reload() {
                    tracing::warn!(error = %e, "failed to reload task store");
                }
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let rendered = ui::render_view(&rx.borrow_and_update(), filter, fmt);
                println!("{rendered}\n");
            }
        }
    }
}
