use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::settings::EngineSettings;

use super::{
    errors::FinalizeError,
    queries::SessionSnapshot,
    repository::SavedSession,
    state::{LibraryItemId, SelectOutcome, SessionStatus},
    store::ActiveSessionStore,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Everything a UI can ask the active session to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionCommand {
    SelectItem { item: LibraryItemId },
    Pause,
    Resume,
    TogglePause,
    #[serde(rename_all = "camelCase")]
    DeleteSection { section_id: String },
    Discard,
    Finalize { rating: u8, comment: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "camelCase")]
pub enum CommandOutcome {
    Selected(SelectOutcome),
    /// `false` when the command was absorbed as a no-op.
    Applied(bool),
    Discarded,
    Saved(SavedSession),
}

struct Refresher {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Keeps the store alive for the UI and relays commands and snapshots.
///
/// Every command publishes a fresh snapshot. While a session is in progress a
/// refresh loop republishes on a fixed cadence so elapsed times keep moving on screen;
/// the loop is display plumbing only and never feeds back into the store.
#[derive(Clone)]
pub struct SessionHost {
    store: Arc<ActiveSessionStore>,
    snapshots: Arc<watch::Sender<SessionSnapshot>>,
    refresher: Arc<Mutex<Option<Refresher>>>,
    refresh_interval: Duration,
}

impl SessionHost {
    pub fn new(store: Arc<ActiveSessionStore>, settings: EngineSettings) -> Self {
        let (snapshots, _) = watch::channel(store.snapshot());
        Self {
            store,
            snapshots: Arc::new(snapshots),
            refresher: Arc::new(Mutex::new(None)),
            refresh_interval: settings.refresh_interval(),
        }
    }

    pub fn store(&self) -> &Arc<ActiveSessionStore> {
        &self.store
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.store.snapshot()
    }

    pub async fn dispatch(&self, command: SessionCommand) -> Result<CommandOutcome, FinalizeError> {
        log_debug!("Dispatching {:?}", command);

        let result = match command {
            SessionCommand::SelectItem { item } => {
                Ok(CommandOutcome::Selected(self.store.select_item(item).await))
            }
            SessionCommand::Pause => Ok(CommandOutcome::Applied(self.store.pause().await)),
            SessionCommand::Resume => Ok(CommandOutcome::Applied(self.store.resume().await)),
            SessionCommand::TogglePause => {
                let changed = match self.store.status() {
                    SessionStatus::Running => self.store.pause().await,
                    SessionStatus::Paused => self.store.resume().await,
                    SessionStatus::NotStarted => false,
                };
                Ok(CommandOutcome::Applied(changed))
            }
            SessionCommand::DeleteSection { section_id } => Ok(CommandOutcome::Applied(
                self.store.delete_section(&section_id).await,
            )),
            SessionCommand::Discard => {
                self.store.reset().await;
                Ok(CommandOutcome::Discarded)
            }
            SessionCommand::Finalize { rating, comment } => self
                .store
                .finalize(rating, &comment)
                .await
                .map(CommandOutcome::Saved),
        };

        self.publish();
        self.sync_refresher().await;
        result
    }

    pub async fn is_refreshing(&self) -> bool {
        self.refresher
            .lock()
            .await
            .as_ref()
            .map_or(false, |refresher| !refresher.handle.is_finished())
    }

    pub async fn shutdown(&self) {
        self.stop_refresher().await;
        self.publish();
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.store.snapshot());
    }

    async fn sync_refresher(&self) {
        if self.store.is_session_running() {
            self.start_refresher().await;
        } else {
            self.stop_refresher().await;
        }
    }

    async fn start_refresher(&self) {
        let mut guard = self.refresher.lock().await;
        if guard
            .as_ref()
            .map_or(false, |refresher| !refresher.handle.is_finished())
        {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let store = self.store.clone();
        let snapshots = self.snapshots.clone();
        let interval = self.refresh_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = store.snapshot();
                        let active = snapshot.status != SessionStatus::NotStarted;
                        snapshots.send_replace(snapshot);
                        if !active {
                            break;
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });

        log_info!("Snapshot refresh started ({} ms)", interval.as_millis());
        *guard = Some(Refresher { handle, cancel });
    }

    async fn stop_refresher(&self) {
        if let Some(refresher) = self.refresher.lock().await.take() {
            refresher.cancel.cancel();
            let _ = refresher.handle.await;
            log_info!("Snapshot refresh stopped");
        }
    }
}
