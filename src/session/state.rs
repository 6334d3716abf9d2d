use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    #[default]
    NotStarted,
    Running,
    Paused,
}

/// Opaque reference to a library item. The engine never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LibraryItemId(String);

impl LibraryItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LibraryItemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for LibraryItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for LibraryItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Handle used to address the section while the session is active.
    pub id: String,
    pub library_item_id: LibraryItemId,
    pub start_timestamp: DateTime<Utc>,
    /// Pause time already folded into this section; grows on every Resume.
    pub pause_accrued: Duration,
    /// Frozen once the section is closed, `None` while it is open.
    pub closed_duration: Option<Duration>,
}

impl Section {
    fn open(id: String, library_item_id: LibraryItemId, start_timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            library_item_id,
            start_timestamp,
            pause_accrued: Duration::zero(),
            closed_duration: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.closed_duration.is_none()
    }

    /// Practiced time if the section were measured up to `until`.
    pub fn duration_until(&self, until: DateTime<Utc>) -> Duration {
        match self.closed_duration {
            Some(frozen) => frozen,
            None => until - self.start_timestamp - self.pause_accrued,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseState {
    pub pause_start: DateTime<Utc>,
}

/// What a SelectItem call did to the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SelectOutcome {
    #[serde(rename_all = "camelCase")]
    Opened { section_id: String },
    #[serde(rename_all = "camelCase")]
    Switched { closed_id: String, section_id: String },
    /// The item was already running; nothing changed.
    AlreadyRunning,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveSessionState {
    pub status: SessionStatus,
    pub timeline: Vec<Section>,
    pub pause: Option<PauseState>,
}

impl ActiveSessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_section(&self) -> Option<&Section> {
        self.timeline.last().filter(|section| section.is_open())
    }

    fn open_section_mut(&mut self) -> Option<&mut Section> {
        self.timeline.last_mut().filter(|section| section.is_open())
    }

    /// Instant at which the open section stops growing: the pause start while paused.
    pub fn measure_point(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match (self.status, self.pause) {
            (SessionStatus::Paused, Some(pause)) => pause.pause_start,
            _ => now,
        }
    }

    /// Selecting the running item never splits its section. While paused, any
    /// selection resumes first.
    pub fn select_item<F>(
        &mut self,
        item: LibraryItemId,
        now: DateTime<Utc>,
        new_id: F,
    ) -> SelectOutcome
    where
        F: FnOnce() -> String,
    {
        if self.status == SessionStatus::Paused {
            self.resume(now);
        }

        let outcome = match self.open_section() {
            Some(open) if open.library_item_id == item => SelectOutcome::AlreadyRunning,
            Some(open) => {
                let closed_id = open.id.clone();
                self.close_open_section(now);
                let section_id = new_id();
                self.timeline
                    .push(Section::open(section_id.clone(), item, now));
                SelectOutcome::Switched {
                    closed_id,
                    section_id,
                }
            }
            None => {
                let section_id = new_id();
                self.timeline
                    .push(Section::open(section_id.clone(), item, now));
                SelectOutcome::Opened { section_id }
            }
        };

        self.status = SessionStatus::Running;
        outcome
    }

    /// Returns `false` when the call was absorbed.
    pub fn pause(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != SessionStatus::Running || self.open_section().is_none() {
            return false;
        }
        self.pause = Some(PauseState { pause_start: now });
        self.status = SessionStatus::Paused;
        true
    }

    /// Returns `false` when the call was absorbed.
    pub fn resume(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != SessionStatus::Paused {
            return false;
        }
        if let Some(pause) = self.pause.take() {
            if let Some(open) = self.open_section_mut() {
                open.pause_accrued = open.pause_accrued + (now - pause.pause_start);
            }
        }
        self.status = SessionStatus::Running;
        true
    }

    /// Removes the section with `section_id`. An ongoing pause belongs to the open
    /// section and goes with it.
    pub fn delete_section(&mut self, section_id: &str) -> bool {
        let Some(index) = self
            .timeline
            .iter()
            .position(|section| section.id == section_id)
        else {
            return false;
        };

        let removed = self.timeline.remove(index);
        if removed.is_open() && self.status == SessionStatus::Paused {
            self.pause = None;
            self.status = SessionStatus::Running;
        }
        true
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Freezes the open section using the running or paused formula.
    pub fn close_open_section(&mut self, now: DateTime<Utc>) {
        let until = self.measure_point(now);
        if let Some(open) = self.open_section_mut() {
            open.closed_duration = Some(open.duration_until(until));
        }
    }

    pub fn holds_invariants(&self) -> bool {
        let open_count = self.timeline.iter().filter(|s| s.is_open()).count();
        let open_is_last = self
            .timeline
            .iter()
            .position(|s| s.is_open())
            .map_or(true, |index| index + 1 == self.timeline.len());
        let pause_matches = (self.status == SessionStatus::Paused) == self.pause.is_some();
        let empty_when_idle =
            self.status != SessionStatus::NotStarted || self.timeline.is_empty();

        open_count <= 1 && open_is_last && pause_matches && empty_when_idle
    }
}
