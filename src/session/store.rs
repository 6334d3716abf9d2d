use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::clock::{IdGenerator, TimeSource};

use super::{
    errors::FinalizeError,
    finalize::{finalize_state, FinalizedSession},
    queries::{self, SessionSnapshot},
    repository::{SavedSession, SessionRepository},
    state::{ActiveSessionState, LibraryItemId, Section, SelectOutcome, SessionStatus},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Sole owner of the active session.
///
/// Commands are serialized through `writer`, which Finalize keeps for the whole
/// repository round trip. Queries only touch `state`, whose lock is never held
/// across an await, so a slow write to disk does not stall the display.
pub struct ActiveSessionStore {
    state: RwLock<ActiveSessionState>,
    writer: Mutex<()>,
    clock: Arc<dyn TimeSource>,
    ids: Arc<dyn IdGenerator>,
    repository: Arc<dyn SessionRepository>,
}

impl ActiveSessionStore {
    pub fn new(
        clock: Arc<dyn TimeSource>,
        ids: Arc<dyn IdGenerator>,
        repository: Arc<dyn SessionRepository>,
    ) -> Self {
        Self {
            state: RwLock::new(ActiveSessionState::new()),
            writer: Mutex::new(()),
            clock,
            ids,
            repository,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn read<T>(&self, f: impl FnOnce(&ActiveSessionState) -> T) -> T {
        match self.state.read() {
            Ok(guard) => f(&*guard),
            Err(poisoned) => f(&*poisoned.into_inner()),
        }
    }

    /// Like `read`, but samples the clock under the lock so a command committing
    /// between the two cannot be measured against a stale instant.
    fn read_now<T>(&self, f: impl FnOnce(&ActiveSessionState, DateTime<Utc>) -> T) -> T {
        self.read(|state| f(state, self.clock.now()))
    }

    fn write<T>(&self, f: impl FnOnce(&mut ActiveSessionState) -> T) -> T {
        let mut guard = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = f(&mut *guard);
        debug_assert!(guard.holds_invariants(), "session invariants broken: {guard:?}");
        result
    }

    // ---- queries ----

    pub fn state(&self) -> ActiveSessionState {
        self.read(|state| state.clone())
    }

    pub fn status(&self) -> SessionStatus {
        self.read(|state| state.status)
    }

    pub fn running_item(&self) -> Option<LibraryItemId> {
        self.read(|state| queries::running_item(state).cloned())
    }

    pub fn running_item_duration(&self) -> Duration {
        self.read_now(queries::running_item_duration)
    }

    pub fn ongoing_pause_duration(&self) -> Duration {
        self.read_now(queries::ongoing_pause_duration)
    }

    pub fn total_practice_duration(&self) -> Duration {
        self.read_now(queries::total_practice_duration)
    }

    pub fn total_pause_duration(&self) -> Duration {
        self.read_now(queries::total_pause_duration)
    }

    pub fn completed_sections(&self) -> Vec<Section> {
        self.read(|state| {
            queries::completed_sections(state)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.read(queries::start_time)
    }

    pub fn is_session_running(&self) -> bool {
        self.read(queries::is_session_running)
    }

    pub fn is_session_paused(&self) -> bool {
        self.read(queries::is_session_paused)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.read_now(queries::snapshot)
    }

    /// What Finalize would store right now, without storing it.
    pub fn preview_finalized(
        &self,
        rating: u8,
        comment: &str,
    ) -> Result<FinalizedSession, FinalizeError> {
        self.read_now(|state, now| finalize_state(state, now, rating, comment))
    }

    // ---- commands ----

    pub async fn select_item(&self, item: LibraryItemId) -> SelectOutcome {
        let _writer = self.writer.lock().await;
        let now = self.now();
        let ids = self.ids.clone();

        let outcome = self.write(|state| state.select_item(item.clone(), now, || ids.generate_id()));

        match &outcome {
            SelectOutcome::Opened { section_id } => {
                log_info!("Practice started on {} (section {})", item, section_id)
            }
            SelectOutcome::Switched {
                closed_id,
                section_id,
            } => log_info!(
                "Switched to {} (closed section {}, opened {})",
                item,
                closed_id,
                section_id
            ),
            SelectOutcome::AlreadyRunning => {
                log_debug!("Ignored selection of running item {}", item)
            }
        }

        outcome
    }

    pub async fn pause(&self) -> bool {
        let _writer = self.writer.lock().await;
        let now = self.now();
        let paused = self.write(|state| state.pause(now));
        if paused {
            log_info!("Session paused at {}", now.to_rfc3339());
        } else {
            log_debug!("Pause ignored; session is not running");
        }
        paused
    }

    pub async fn resume(&self) -> bool {
        let _writer = self.writer.lock().await;
        let now = self.now();
        let resumed = self.write(|state| state.resume(now));
        if resumed {
            log_info!("Session resumed at {}", now.to_rfc3339());
        } else {
            log_debug!("Resume ignored; session is not paused");
        }
        resumed
    }

    pub async fn delete_section(&self, section_id: &str) -> bool {
        let _writer = self.writer.lock().await;
        let deleted = self.write(|state| state.delete_section(section_id));
        if deleted {
            log_info!("Deleted section {}", section_id);
        } else {
            log_debug!("No section {} to delete", section_id);
        }
        deleted
    }

    /// Drops the session without saving anything.
    pub async fn reset(&self) {
        let _writer = self.writer.lock().await;
        let discarded = self.write(|state| {
            let count = state.timeline.len();
            state.reset();
            count
        });
        log_info!("Session discarded ({} sections)", discarded);
    }

    /// Validates and stores the session, then clears it.
    ///
    /// On any error the in-memory session is exactly as it was before the call, so the
    /// caller can fix the input or retry. Dropping the returned future before it
    /// completes has the same effect.
    pub async fn finalize(&self, rating: u8, comment: &str) -> Result<SavedSession, FinalizeError> {
        let _writer = self.writer.lock().await;
        let now = self.now();

        let FinalizedSession { session, sections } = self
            .read(|state| finalize_state(state, now, rating, comment))
            .map_err(|err| {
                log_warn!("Finalize rejected: {}", err);
                err
            })?;

        let section_count = sections.len();
        let break_ms = session.break_duration.num_milliseconds();

        match self.repository.add(session, sections).await {
            Ok(saved) => {
                self.write(|state| state.reset());
                log_info!(
                    "Session {} saved with {} sections ({} ms break)",
                    saved.session_id,
                    section_count,
                    break_ms
                );
                Ok(saved)
            }
            Err(err) => {
                log_error!("Failed to save session; keeping it in memory: {:#}", err);
                Err(FinalizeError::Persistence(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::{FakeTimeSource, SequentialIdGenerator},
        session::{
            finalize::{SectionAttributes, SessionAttributes},
            repository::InMemorySessionRepository,
        },
    };
    use async_trait::async_trait;

    struct Harness {
        clock: Arc<FakeTimeSource>,
        repository: Arc<InMemorySessionRepository>,
        store: ActiveSessionStore,
    }

    fn harness() -> Harness {
        let clock = Arc::new(FakeTimeSource::at_epoch());
        let repository = Arc::new(InMemorySessionRepository::new(Arc::new(
            SequentialIdGenerator::new("row"),
        )));
        let store = ActiveSessionStore::new(
            clock.clone(),
            Arc::new(SequentialIdGenerator::new("section")),
            repository.clone(),
        );
        Harness {
            clock,
            repository,
            store,
        }
    }

    fn secs(n: i64) -> Duration {
        Duration::seconds(n)
    }

    #[tokio::test]
    async fn pause_resume_reference_scenario() {
        let h = harness();
        h.store.select_item("a".into()).await;
        h.clock.advance(secs(60));
        h.store.pause().await;
        h.clock.advance(secs(90));

        assert_eq!(h.store.ongoing_pause_duration(), secs(90));
        assert_eq!(h.store.running_item_duration(), secs(60));

        h.store.resume().await;
        h.clock.advance(secs(30));

        assert_eq!(h.store.running_item_duration(), secs(90));
        assert_eq!(h.store.total_pause_duration(), secs(90));
        assert_eq!(h.store.total_practice_duration(), secs(90));
    }

    #[tokio::test]
    async fn two_item_session_is_persisted_and_cleared() {
        let h = harness();
        h.store.select_item("a".into()).await;
        h.clock.advance(secs(10));
        h.store.select_item("b".into()).await;
        h.clock.advance(secs(20));

        let saved = h.store.finalize(4, "").await.expect("finalize");
        assert_eq!(saved.section_ids.len(), 2);

        let stored = h.repository.sessions();
        assert_eq!(stored.len(), 1);
        let sections: Vec<_> = stored[0]
            .sections
            .iter()
            .map(|(_, s)| (s.library_item_id.as_str().to_string(), s.duration))
            .collect();
        assert_eq!(
            sections,
            vec![("a".to_string(), secs(10)), ("b".to_string(), secs(20))]
        );
        assert_eq!(stored[0].session.break_duration, Duration::zero());

        assert_eq!(h.store.status(), SessionStatus::NotStarted);
        assert_eq!(h.store.state(), ActiveSessionState::default());
    }

    #[tokio::test]
    async fn reselecting_running_item_keeps_one_section() {
        let h = harness();
        h.store.select_item("a".into()).await;
        h.clock.advance(Duration::milliseconds(300));
        let double_tap = h.store.select_item("a".into()).await;
        h.clock.advance(secs(90));
        let much_later = h.store.select_item("a".into()).await;

        assert_eq!(double_tap, SelectOutcome::AlreadyRunning);
        assert_eq!(much_later, SelectOutcome::AlreadyRunning);
        assert_eq!(h.store.state().timeline.len(), 1);
        assert_eq!(h.store.running_item_duration(), Duration::milliseconds(90_300));
    }

    #[tokio::test]
    async fn empty_session_is_rejected_and_left_alone() {
        let h = harness();
        h.store.select_item("a".into()).await;
        h.clock.advance(secs(5));
        let section_id = h.store.snapshot().running_section_id.expect("running section");
        h.store.delete_section(&section_id).await;

        let before = h.store.total_practice_duration();
        let err = h.store.finalize(3, "").await.unwrap_err();
        assert!(matches!(err, FinalizeError::InvalidSection(_)));
        assert_eq!(h.store.total_practice_duration(), before);
        assert!(h.store.is_session_running());
        assert!(h.repository.sessions().is_empty());
    }

    #[tokio::test]
    async fn bad_rating_keeps_session() {
        let h = harness();
        h.store.select_item("a".into()).await;
        h.clock.advance(secs(30));

        let err = h.store.finalize(6, "").await.unwrap_err();
        assert_eq!(err.to_string(), "Rating must be between 1 and 5");
        assert!(!err.is_retryable());
        assert_eq!(h.store.total_practice_duration(), secs(30));
    }

    #[tokio::test]
    async fn storage_failure_keeps_session_for_retry() {
        let h = harness();
        h.store.select_item("a".into()).await;
        h.clock.advance(secs(30));
        h.store.pause().await;
        let before = h.store.state();

        h.repository.set_fail_writes(true);
        let err = h.store.finalize(5, "good").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.store.state(), before);

        h.repository.set_fail_writes(false);
        h.clock.advance(secs(10));
        h.store.finalize(5, "good").await.expect("retry succeeds");

        let stored = h.repository.sessions();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sections[0].1.duration, secs(30));
        assert_eq!(stored[0].session.break_duration, secs(10));
    }

    struct StalledRepository;

    #[async_trait]
    impl SessionRepository for StalledRepository {
        async fn add(
            &self,
            _session: SessionAttributes,
            _sections: Vec<SectionAttributes>,
        ) -> anyhow::Result<SavedSession> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancelled_finalize_leaves_state_intact() {
        let clock = Arc::new(FakeTimeSource::at_epoch());
        let store = ActiveSessionStore::new(
            clock.clone(),
            Arc::new(SequentialIdGenerator::default()),
            Arc::new(StalledRepository),
        );
        store.select_item("a".into()).await;
        clock.advance(secs(20));
        let before = store.state();

        let attempt =
            tokio::time::timeout(std::time::Duration::from_millis(20), store.finalize(3, "")).await;
        assert!(attempt.is_err());
        assert_eq!(store.state(), before);

        // The writer lock was released with the cancelled call.
        store.pause().await;
        assert!(store.is_session_paused());
    }

    #[tokio::test]
    async fn queries_are_not_blocked_by_pending_finalize() {
        let clock = Arc::new(FakeTimeSource::at_epoch());
        let store = Arc::new(ActiveSessionStore::new(
            clock.clone(),
            Arc::new(SequentialIdGenerator::default()),
            Arc::new(StalledRepository),
        ));
        store.select_item("a".into()).await;
        clock.advance(secs(7));

        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.finalize(3, "").await })
        };
        tokio::task::yield_now().await;

        assert_eq!(store.total_practice_duration(), secs(7));
        assert_eq!(store.snapshot().status, SessionStatus::Running);
        pending.abort();
    }

    #[tokio::test]
    async fn concurrent_commands_keep_invariants() {
        let h = harness();
        let store = Arc::new(h.store);
        let mut tasks = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            let clock = h.clock.clone();
            tasks.push(tokio::spawn(async move {
                clock.advance(secs(1));
                match i % 4 {
                    0 => {
                        store.select_item(format!("item-{}", i % 3).into()).await;
                    }
                    1 => {
                        store.pause().await;
                    }
                    2 => {
                        store.resume().await;
                    }
                    _ => {
                        store.select_item("item-x".into()).await;
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let state = store.state();
        assert!(state.holds_invariants());
        assert_eq!(state.timeline.iter().filter(|s| s.is_open()).count(), 1);
    }

    #[tokio::test]
    async fn reset_discards_everything() {
        let h = harness();
        h.store.select_item("a".into()).await;
        h.clock.advance(secs(3));
        h.store.pause().await;
        h.store.reset().await;

        assert_eq!(h.store.status(), SessionStatus::NotStarted);
        assert_eq!(h.store.total_pause_duration(), Duration::zero());
        assert_eq!(h.store.start_time(), None);
        assert!(h.repository.sessions().is_empty());
    }

    /// Counts clock reads made while nobody holds the session lock.
    struct LockAwareClock {
        inner: FakeTimeSource,
        store: std::sync::OnceLock<std::sync::Weak<ActiveSessionStore>>,
        reads: std::sync::atomic::AtomicUsize,
        unlocked_reads: std::sync::atomic::AtomicUsize,
    }

    impl TimeSource for LockAwareClock {
        fn now(&self) -> DateTime<Utc> {
            use std::sync::atomic::Ordering;

            if let Some(store) = self.store.get().and_then(|weak| weak.upgrade()) {
                self.reads.fetch_add(1, Ordering::SeqCst);
                if store.state.try_write().is_ok() {
                    self.unlocked_reads.fetch_add(1, Ordering::SeqCst);
                }
            }
            self.inner.now()
        }
    }

    #[tokio::test]
    async fn queries_sample_the_clock_under_the_session_lock() {
        use std::sync::atomic::Ordering;

        let clock = Arc::new(LockAwareClock {
            inner: FakeTimeSource::at_epoch(),
            store: std::sync::OnceLock::new(),
            reads: Default::default(),
            unlocked_reads: Default::default(),
        });
        let store = Arc::new(ActiveSessionStore::new(
            clock.clone(),
            Arc::new(SequentialIdGenerator::default()),
            Arc::new(InMemorySessionRepository::new(Arc::new(
                SequentialIdGenerator::new("row"),
            ))),
        ));
        store.select_item("a".into()).await;
        clock.inner.advance(secs(4));
        store.pause().await;
        let _ = clock.store.set(Arc::downgrade(&store));

        let _ = store.running_item_duration();
        let _ = store.ongoing_pause_duration();
        let _ = store.total_practice_duration();
        let _ = store.total_pause_duration();
        let _ = store.snapshot();
        let _ = store.preview_finalized(3, "");

        assert_eq!(clock.reads.load(Ordering::SeqCst), 6);
        assert_eq!(clock.unlocked_reads.load(Ordering::SeqCst), 0);
    }
}
