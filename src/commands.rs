use serde::Serialize;
use serde_json::Value;

use crate::{
    db::models::SessionWithSections,
    session::{SessionCommand, SessionSnapshot},
    AppState,
};

/// One line typed at the command host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Session(SessionCommand),
    Status,
    History,
    Quit,
}

/// Parses a console line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "select" => {
            if rest.is_empty() {
                return Err("usage: select <item>".into());
            }
            ConsoleCommand::Session(SessionCommand::SelectItem { item: rest.into() })
        }
        "pause" => ConsoleCommand::Session(SessionCommand::Pause),
        "resume" => ConsoleCommand::Session(SessionCommand::Resume),
        "toggle" => ConsoleCommand::Session(SessionCommand::TogglePause),
        "delete" => {
            if rest.is_empty() {
                return Err("usage: delete <section-id>".into());
            }
            ConsoleCommand::Session(SessionCommand::DeleteSection {
                section_id: rest.to_string(),
            })
        }
        "discard" => ConsoleCommand::Session(SessionCommand::Discard),
        "finish" => {
            let (rating, comment) = match rest.split_once(char::is_whitespace) {
                Some((rating, comment)) => (rating, comment.trim()),
                None => (rest, ""),
            };
            let rating = rating
                .parse::<u8>()
                .map_err(|_| "usage: finish <rating 1-5> [comment]".to_string())?;
            ConsoleCommand::Session(SessionCommand::Finalize {
                rating,
                comment: comment.to_string(),
            })
        }
        "status" => ConsoleCommand::Status,
        "history" => ConsoleCommand::History,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '{other}'")),
    };

    Ok(Some(command))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

pub async fn execute(state: &AppState, command: ConsoleCommand) -> Result<Value, String> {
    match command {
        ConsoleCommand::Session(command) => {
            let outcome = state.host.dispatch(command).await.map_err(|e| e.to_string())?;
            to_json(&outcome)
        }
        ConsoleCommand::Status => get_snapshot(state),
        ConsoleCommand::History => to_json(&list_history(state).await?),
        ConsoleCommand::Quit => Ok(Value::Null),
    }
}

pub fn get_snapshot(state: &AppState) -> Result<Value, String> {
    let snapshot: SessionSnapshot = state.host.snapshot();
    to_json(&snapshot)
}

pub async fn list_history(state: &AppState) -> Result<Vec<SessionWithSections>, String> {
    let db = &state.db;
    let sessions = db.list_sessions().await.map_err(|e| e.to_string())?;

    let mut history = Vec::with_capacity(sessions.len());
    for session in sessions {
        if let Some(stored) = db.get_session(&session.id).await.map_err(|e| e.to_string())? {
            history.push(stored);
        }
    }
    Ok(history)
}
