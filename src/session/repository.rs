use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::clock::IdGenerator;

use super::finalize::{SectionAttributes, SessionAttributes};

/// Ids assigned by the repository to a freshly stored session and its sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSession {
    pub session_id: String,
    pub section_ids: Vec<String>,
}

/// Permanent storage for finalized sessions.
///
/// `add` must be all-or-nothing: either the session row and every section row are
/// stored, or nothing is and an error comes back.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn add(
        &self,
        session: SessionAttributes,
        sections: Vec<SectionAttributes>,
    ) -> Result<SavedSession>;
}

/// Keeps finalized sessions in memory. Used when no database is configured and in tests.
pub struct InMemorySessionRepository {
    ids: Arc<dyn IdGenerator>,
    stored: Mutex<Vec<StoredSession>>,
    fail_writes: AtomicBool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub session_id: String,
    pub session: SessionAttributes,
    pub sections: Vec<(String, SectionAttributes)>,
}

impl InMemorySessionRepository {
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            ids,
            stored: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every following `add` fail until switched off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn sessions(&self) -> Vec<StoredSession> {
        match self.stored.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn add(
        &self,
        session: SessionAttributes,
        sections: Vec<SectionAttributes>,
    ) -> Result<SavedSession> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("session storage is unavailable");
        }

        let session_id = self.ids.generate_id();
        let sections: Vec<(String, SectionAttributes)> = sections
            .into_iter()
            .map(|section| (self.ids.generate_id(), section))
            .collect();
        let saved = SavedSession {
            session_id: session_id.clone(),
            section_ids: sections.iter().map(|(id, _)| id.clone()).collect(),
        };

        let mut guard = match self.stored.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(StoredSession {
            session_id,
            session,
            sections,
        });
        Ok(saved)
    }
}
