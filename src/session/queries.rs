//! Derived session figures.
//!
//! Nothing here is cached or incremented on a timer: every value is recomputed from
//! the absolute timestamps in [`ActiveSessionState`] and the instant passed in, so a
//! host that was suspended for an hour gets the right answer on its next poll.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::state::{ActiveSessionState, LibraryItemId, Section, SessionStatus};

/// Practiced time of the open section. Frozen while paused.
pub fn running_item_duration(state: &ActiveSessionState, now: DateTime<Utc>) -> Duration {
    state
        .open_section()
        .map(|open| open.duration_until(state.measure_point(now)))
        .unwrap_or_else(Duration::zero)
}

pub fn ongoing_pause_duration(state: &ActiveSessionState, now: DateTime<Utc>) -> Duration {
    match (state.status, state.pause) {
        (SessionStatus::Paused, Some(pause)) => now - pause.pause_start,
        _ => Duration::zero(),
    }
}

pub fn total_practice_duration(state: &ActiveSessionState, now: DateTime<Utc>) -> Duration {
    let closed = state
        .timeline
        .iter()
        .filter_map(|section| section.closed_duration)
        .fold(Duration::zero(), |acc, duration| acc + duration);
    closed + running_item_duration(state, now)
}

/// Session break time: every folded pause plus the one in progress.
pub fn total_pause_duration(state: &ActiveSessionState, now: DateTime<Utc>) -> Duration {
    let accrued = state
        .timeline
        .iter()
        .fold(Duration::zero(), |acc, section| acc + section.pause_accrued);
    accrued + ongoing_pause_duration(state, now)
}

pub fn completed_sections(state: &ActiveSessionState) -> Vec<&Section> {
    state
        .timeline
        .iter()
        .filter(|section| !section.is_open())
        .collect()
}

pub fn running_item(state: &ActiveSessionState) -> Option<&LibraryItemId> {
    state.open_section().map(|open| &open.library_item_id)
}

pub fn start_time(state: &ActiveSessionState) -> Option<DateTime<Utc>> {
    state.timeline.first().map(|section| section.start_timestamp)
}

/// A session is in progress from the first SelectItem until Finalize or Reset,
/// whether or not it is currently paused.
pub fn is_session_running(state: &ActiveSessionState) -> bool {
    state.status != SessionStatus::NotStarted
}

pub fn is_session_paused(state: &ActiveSessionState) -> bool {
    state.status == SessionStatus::Paused
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedSectionView {
    pub id: String,
    pub library_item_id: LibraryItemId,
    pub start_timestamp: DateTime<Utc>,
    pub duration_ms: i64,
}

/// Everything a UI needs to draw one frame of the active session screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub running_item: Option<LibraryItemId>,
    pub running_section_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub running_item_duration_ms: i64,
    pub ongoing_pause_duration_ms: i64,
    pub total_practice_duration_ms: i64,
    pub total_pause_duration_ms: i64,
    pub completed_sections: Vec<CompletedSectionView>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        snapshot(&ActiveSessionState::default(), DateTime::<Utc>::UNIX_EPOCH)
    }
}

pub fn snapshot(state: &ActiveSessionState, now: DateTime<Utc>) -> SessionSnapshot {
    SessionSnapshot {
        status: state.status,
        running_item: running_item(state).cloned(),
        running_section_id: state.open_section().map(|open| open.id.clone()),
        start_time: start_time(state),
        running_item_duration_ms: running_item_duration(state, now).num_milliseconds(),
        ongoing_pause_duration_ms: ongoing_pause_duration(state, now).num_milliseconds(),
        total_practice_duration_ms: total_practice_duration(state, now).num_milliseconds(),
        total_pause_duration_ms: total_pause_duration(state, now).num_milliseconds(),
        completed_sections: completed_sections(state)
            .into_iter()
            .map(|section| CompletedSectionView {
                id: section.id.clone(),
                library_item_id: section.library_item_id.clone(),
                start_timestamp: section.start_timestamp,
                duration_ms: section.duration_until(now).num_milliseconds(),
            })
            .collect(),
    }
}
