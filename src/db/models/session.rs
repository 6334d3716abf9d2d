//! Rows of the `sessions` and `sections` tables.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::session::LibraryItemId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub break_duration_ms: i64,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn break_duration(&self) -> Duration {
        Duration::milliseconds(self.break_duration_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRecord {
    pub id: String,
    pub session_id: String,
    pub library_item_id: LibraryItemId,
    pub start_timestamp: DateTime<Utc>,
    pub duration_ms: i64,
}

impl SectionRecord {
    pub fn duration(&self) -> Duration {
        Duration::milliseconds(self.duration_ms)
    }
}

/// A stored session with its sections in practice order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionWithSections {
    pub session: SessionRecord,
    pub sections: Vec<SectionRecord>,
}

impl SessionWithSections {
    pub fn practice_duration(&self) -> Duration {
        self.sections
            .iter()
            .fold(Duration::zero(), |acc, section| acc + section.duration())
    }
}
