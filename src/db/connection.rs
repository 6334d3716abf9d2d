use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use thiserror::Error;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

/// Tasks slower than this are logged at warn level.
const SLOW_TASK: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to open practice database at {}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to enable foreign keys")]
    ForeignKeys(#[source] rusqlite::Error),

    #[error("database worker stopped before it was ready")]
    NotReady,

    #[error("database worker is no longer running ({0})")]
    WorkerGone(&'static str),
}

struct Job {
    label: &'static str,
    run: Box<dyn FnOnce(&mut Connection) + Send + 'static>,
}

struct DatabaseInner {
    /// `None` once shutdown has begun; dropping it ends the worker loop.
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        match self.jobs.lock() {
            Ok(mut jobs) => drop(jobs.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }

        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(join_err) = handle.join() {
                error!("Practice database worker panicked: {join_err:?}");
            }
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path).map_err(|source| DbError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("WAL journal unavailable, using SQLite default: {err}");
    }
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(DbError::ForeignKeys)?;

    run_migrations(&mut conn).context("failed to migrate practice database")?;
    Ok(conn)
}

fn serve(mut conn: Connection, jobs: mpsc::Receiver<Job>) {
    for job in jobs {
        let started = Instant::now();
        (job.run)(&mut conn);
        let elapsed = started.elapsed();
        if elapsed >= SLOW_TASK {
            warn!("Database task '{}' took {:?}", job.label, elapsed);
        } else {
            debug!("Database task '{}' took {:?}", job.label, elapsed);
        }
    }
    info!("Practice database worker stopped");
}

/// Handle to the practice database.
///
/// The SQLite connection lives on its own thread; async callers queue labelled
/// closures and await the reply, so blocking SQLite calls stay off the runtime.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let path = db_path.clone();

        let worker = thread::Builder::new()
            .name("practice-db".into())
            .spawn(move || match open_connection(&path) {
                Ok(conn) => {
                    if ready_tx.send(Ok(())).is_ok() {
                        serve(conn, jobs_rx);
                    }
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .context("failed to spawn database worker thread")?;

        match ready_rx.recv() {
            Ok(result) => result?,
            Err(_) => return Err(DbError::NotReady.into()),
        }

        info!("Practice database ready at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                jobs: Mutex::new(Some(jobs_tx)),
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// Runs `task` on the database thread. `label` names the task in logs and errors.
    pub async fn execute<F, T>(&self, label: &'static str, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            label,
            run: Box::new(move |conn| {
                if reply_tx.send(task(conn)).is_err() {
                    debug!("Caller of database task '{label}' went away");
                }
            }),
        };

        let sent = match self.inner.jobs.lock() {
            Ok(jobs) => jobs.as_ref().map(|tx| tx.send(job).is_ok()),
            Err(poisoned) => poisoned.into_inner().as_ref().map(|tx| tx.send(job).is_ok()),
        };
        if sent != Some(true) {
            return Err(DbError::WorkerGone(label).into());
        }

        reply_rx
            .await
            .map_err(|_| DbError::WorkerGone(label))?
    }
}
