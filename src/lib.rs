pub mod clock;
pub mod commands;
pub mod db;
pub mod session;
pub mod settings;
pub mod utils;

use std::sync::Arc;

use anyhow::Context;
use clock::{IdGenerator, SystemTimeSource, TimeSource, UuidGenerator};
use commands::ConsoleCommand;
use db::{Database, SqliteSessionRepository};
use log::warn;
use serde_json::json;
use session::{ActiveSessionStore, SessionHost};
use settings::{EngineSettings, SettingsStore, DATABASE_FILE, SETTINGS_FILE};
use tokio::io::{AsyncBufReadExt, BufReader};

pub struct AppState {
    pub host: SessionHost,
    pub db: Database,
}

impl AppState {
    /// Wires the store, the SQLite repository and the host together.
    pub fn new(db: Database, engine: EngineSettings) -> Self {
        let clock: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
        let ids: Arc<dyn IdGenerator> = Arc::new(UuidGenerator);
        let repository = Arc::new(SqliteSessionRepository::new(
            db.clone(),
            ids.clone(),
            clock.clone(),
        ));
        let store = Arc::new(ActiveSessionStore::new(clock, ids, repository));

        Self {
            host: SessionHost::new(store, engine),
            db,
        }
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(err) => log::error!("Failed to serialize output: {err}"),
    }
}

pub async fn run() -> anyhow::Result<()> {
    utils::logging::init(settings::debug_from_env());

    log::info!("Practice session host starting up...");

    let data_dir = settings::data_dir_from_env();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let database = Database::new(data_dir.join(DATABASE_FILE))?;
    let settings_store = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;
    let engine = settings_store.engine();
    log::info!("Snapshot refresh every {} ms", engine.refresh_interval_ms);
    let state = AppState::new(database, engine);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match commands::parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                print_json(&json!({ "error": message }));
                continue;
            }
        };

        if command == ConsoleCommand::Quit {
            break;
        }

        match commands::execute(&state, command).await {
            Ok(result) => print_json(&json!({ "ok": result, "snapshot": state.host.snapshot() })),
            Err(message) => print_json(&json!({ "error": message })),
        }
    }

    if state.host.store().is_session_running() {
        warn!("Exiting with an unsaved session; it is discarded");
    }
    state.host.shutdown().await;

    log::info!("Practice session host stopped");
    Ok(())
}
