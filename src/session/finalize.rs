//! Turning the active session into the record handed to the repository.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{
    errors::FinalizeError,
    queries::total_pause_duration,
    state::{ActiveSessionState, LibraryItemId},
};

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;
pub const MAX_COMMENT_CHARS: usize = 500;

/// Finalized durations are whole milliseconds, the precision sessions are stored at.
fn whole_millis(duration: Duration) -> Duration {
    Duration::milliseconds(duration.num_milliseconds())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAttributes {
    pub rating: u8,
    pub comment: String,
    #[serde(with = "duration_ms")]
    pub break_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionAttributes {
    pub library_item_id: LibraryItemId,
    pub start_timestamp: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedSession {
    pub session: SessionAttributes,
    pub sections: Vec<SectionAttributes>,
}

/// Builds the record that Finalize would persist at `now`, leaving `state` untouched.
///
/// Checks run in a fixed order and the first failure wins: sections, then rating,
/// comment and break duration. Sections shorter than a millisecond (a double tap on
/// two items) are dropped quietly before the section checks.
pub fn finalize_state(
    state: &ActiveSessionState,
    now: DateTime<Utc>,
    rating: u8,
    comment: &str,
) -> Result<FinalizedSession, FinalizeError> {
    let mut closing = state.clone();
    closing.close_open_section(now);

    let sections: Vec<SectionAttributes> = closing
        .timeline
        .iter()
        .map(|section| SectionAttributes {
            library_item_id: section.library_item_id.clone(),
            start_timestamp: section.start_timestamp,
            duration: whole_millis(section.duration_until(now)),
        })
        .filter(|section| section.duration != Duration::zero())
        .collect();

    if !sections.iter().any(|section| section.duration > Duration::zero()) {
        return Err(FinalizeError::invalid_section(
            "Each session must include at least one section",
        ));
    }

    if sections
        .iter()
        .any(|section| section.duration <= Duration::zero())
    {
        return Err(FinalizeError::invalid_section(
            "Section duration must be greater than 0",
        ));
    }

    if !(MIN_RATING..=MAX_RATING).contains(&rating) {
        return Err(FinalizeError::invalid_session(
            "Rating must be between 1 and 5",
        ));
    }

    if comment.chars().count() > MAX_COMMENT_CHARS {
        return Err(FinalizeError::invalid_session(
            "Comment must be less than 500 characters",
        ));
    }

    let break_duration = whole_millis(total_pause_duration(state, now));
    if break_duration < Duration::zero() {
        return Err(FinalizeError::invalid_session(
            "Break duration must be greater than or equal to 0",
        ));
    }

    Ok(FinalizedSession {
        session: SessionAttributes {
            rating,
            comment: comment.to_string(),
            break_duration,
        },
        sections,
    })
}

pub(crate) mod duration_ms {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(duration.num_milliseconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        i64::deserialize(deserializer).map(Duration::milliseconds)
    }
}
