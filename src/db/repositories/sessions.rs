use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};

use crate::{
    clock::{IdGenerator, TimeSource},
    db::{
        connection::Database,
        helpers::{duration_to_ms, non_negative, parse_datetime},
        models::{SectionRecord, SessionRecord, SessionWithSections},
    },
    session::{SavedSession, SectionAttributes, SessionAttributes, SessionRepository},
};

fn row_to_session(row: &Row) -> Result<SessionRecord> {
    let break_duration_ms: i64 = row.get("break_duration_ms")?;
    let rating: i64 = row.get("rating")?;
    let created_at: String = row.get("created_at")?;

    Ok(SessionRecord {
        id: row.get("id")?,
        break_duration_ms: non_negative(break_duration_ms, "break_duration_ms")?,
        rating: u8::try_from(rating).map_err(|_| anyhow!("rating {rating} out of range"))?,
        comment: row.get("comment")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

fn row_to_section(row: &Row) -> Result<SectionRecord> {
    let library_item_id: String = row.get("library_item_id")?;
    let start_timestamp: String = row.get("start_timestamp")?;
    let duration_ms: i64 = row.get("duration_ms")?;

    Ok(SectionRecord {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        library_item_id: library_item_id.into(),
        start_timestamp: parse_datetime(&start_timestamp, "start_timestamp")?,
        duration_ms: non_negative(duration_ms, "duration_ms")?,
    })
}

impl Database {
    /// Inserts a session and all of its sections in one transaction.
    pub async fn insert_session_with_sections(
        &self,
        session: SessionRecord,
        sections: Vec<SectionRecord>,
    ) -> Result<()> {
        self.execute("insert session", move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO sessions (id, break_duration_ms, rating, comment, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session.id,
                    session.break_duration_ms,
                    session.rating,
                    session.comment,
                    session.created_at.to_rfc3339(),
                ],
            )
            .with_context(|| format!("failed to insert session {}", session.id))?;

            for (position, section) in sections.iter().enumerate() {
                tx.execute(
                    "INSERT INTO sections (id, session_id, position, library_item_id, start_timestamp, duration_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        section.id,
                        section.session_id,
                        position as i64,
                        section.library_item_id.as_str(),
                        section.start_timestamp.to_rfc3339(),
                        section.duration_ms,
                    ],
                )
                .with_context(|| format!("failed to insert section {}", section.id))?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionWithSections>> {
        let session_id = session_id.to_string();
        self.execute("get session", move |conn| {
            let session = conn
                .query_row(
                    "SELECT id, break_duration_ms, rating, comment, created_at
                     FROM sessions
                     WHERE id = ?1",
                    params![session_id],
                    |row| Ok(row_to_session(row)),
                )
                .optional()?
                .transpose()?;

            let Some(session) = session else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT id, session_id, library_item_id, start_timestamp, duration_ms
                 FROM sections
                 WHERE session_id = ?1
                 ORDER BY position ASC",
            )?;
            let mut rows = stmt.query(params![session.id])?;
            let mut sections = Vec::new();
            while let Some(row) = rows.next()? {
                sections.push(row_to_section(row)?);
            }

            Ok(Some(SessionWithSections { session, sections }))
        })
        .await
    }

    /// All stored sessions, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.execute("list sessions", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, break_duration_ms, rating, comment, created_at
                 FROM sessions
                 ORDER BY created_at DESC",
            )?;

            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }

            Ok(sessions)
        })
        .await
    }

    /// Deletes a session; its sections go with it through `ON DELETE CASCADE`.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        self.execute("delete session", move |conn| {
            let rows_affected =
                conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
            Ok(rows_affected > 0)
        })
        .await
    }
}

/// [`SessionRepository`] backed by the SQLite database.
#[derive(Clone)]
pub struct SqliteSessionRepository {
    db: Database,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn TimeSource>,
}

impl SqliteSessionRepository {
    pub fn new(db: Database, ids: Arc<dyn IdGenerator>, clock: Arc<dyn TimeSource>) -> Self {
        Self { db, ids, clock }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn add(
        &self,
        session: SessionAttributes,
        sections: Vec<SectionAttributes>,
    ) -> Result<SavedSession> {
        let session_id = self.ids.generate_id();
        let record = SessionRecord {
            id: session_id.clone(),
            break_duration_ms: duration_to_ms(session.break_duration, "break_duration_ms")?,
            rating: session.rating,
            comment: session.comment,
            created_at: self.clock.now(),
        };

        let section_records = sections
            .into_iter()
            .map(|section| {
                Ok(SectionRecord {
                    id: self.ids.generate_id(),
                    session_id: session_id.clone(),
                    library_item_id: section.library_item_id,
                    start_timestamp: section.start_timestamp,
                    duration_ms: duration_to_ms(section.duration, "duration_ms")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let section_ids = section_records
            .iter()
            .map(|section| section.id.clone())
            .collect();

        self.db
            .insert_session_with_sections(record, section_records)
            .await
            .context("failed to store finalized session")?;

        Ok(SavedSession {
            session_id,
            section_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FakeTimeSource, SequentialIdGenerator};
    use chrono::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        repository: SqliteSessionRepository,
        clock: Arc<FakeTimeSource>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("practice.sqlite3")).unwrap();
        let clock = Arc::new(FakeTimeSource::at_epoch());
        let repository = SqliteSessionRepository::new(
            db,
            Arc::new(SequentialIdGenerator::new("row")),
            clock.clone(),
        );
        Fixture {
            _dir: dir,
            repository,
            clock,
        }
    }

    fn section(item: &str, start_offset: i64, secs: i64, clock: &FakeTimeSource) -> SectionAttributes {
        SectionAttributes {
            library_item_id: item.into(),
            start_timestamp: clock.now() + Duration::seconds(start_offset),
            duration: Duration::seconds(secs),
        }
    }

    #[tokio::test]
    async fn add_then_read_back() {
        let f = fixture();
        let saved = f
            .repository
            .add(
                SessionAttributes {
                    rating: 4,
                    comment: "arpeggios".into(),
                    break_duration: Duration::seconds(15),
                },
                vec![
                    section("a", 0, 10, &f.clock),
                    section("b", 10, 20, &f.clock),
                ],
            )
            .await
            .unwrap();

        assert_eq!(saved.session_id, "row-1");
        assert_eq!(saved.section_ids, vec!["row-2".to_string(), "row-3".to_string()]);

        let stored = f
            .repository
            .database()
            .get_session(&saved.session_id)
            .await
            .unwrap()
            .expect("stored session");
        assert_eq!(stored.session.rating, 4);
        assert_eq!(stored.session.comment, "arpeggios");
        assert_eq!(stored.session.break_duration(), Duration::seconds(15));
        let items: Vec<_> = stored
            .sections
            .iter()
            .map(|s| (s.library_item_id.as_str().to_string(), s.duration()))
            .collect();
        assert_eq!(
            items,
            vec![
                ("a".to_string(), Duration::seconds(10)),
                ("b".to_string(), Duration::seconds(20))
            ]
        );
        assert_eq!(stored.practice_duration(), Duration::seconds(30));
    }

    #[tokio::test]
    async fn failing_section_rolls_back_whole_session() {
        let f = fixture();
        // duration_ms > 0 is enforced by the schema, so a zero section fails mid-insert
        let record = SessionRecord {
            id: "s1".into(),
            break_duration_ms: 0,
            rating: 3,
            comment: String::new(),
            created_at: f.clock.now(),
        };
        let sections = vec![
            SectionRecord {
                id: "x1".into(),
                session_id: "s1".into(),
                library_item_id: "a".into(),
                start_timestamp: f.clock.now(),
                duration_ms: 1_000,
            },
            SectionRecord {
                id: "x2".into(),
                session_id: "s1".into(),
                library_item_id: "b".into(),
                start_timestamp: f.clock.now(),
                duration_ms: 0,
            },
        ];

        let db = f.repository.database();
        assert!(db.insert_session_with_sections(record, sections).await.is_err());
        assert!(db.get_session("s1").await.unwrap().is_none());
        assert!(db.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn negative_break_is_refused_before_touching_disk() {
        let f = fixture();
        let result = f
            .repository
            .add(
                SessionAttributes {
                    rating: 3,
                    comment: String::new(),
                    break_duration: Duration::seconds(-1),
                },
                vec![section("a", 0, 10, &f.clock)],
            )
            .await;
        assert!(result.is_err());
        assert!(f.repository.database().list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_delete_cascades() {
        let f = fixture();
        let first = f
            .repository
            .add(
                SessionAttributes {
                    rating: 2,
                    comment: String::new(),
                    break_duration: Duration::zero(),
                },
                vec![section("a", 0, 5, &f.clock)],
            )
            .await
            .unwrap();
        f.clock.advance(Duration::hours(1));
        let second = f
            .repository
            .add(
                SessionAttributes {
                    rating: 5,
                    comment: String::new(),
                    break_duration: Duration::zero(),
                },
                vec![section("b", 0, 5, &f.clock)],
            )
            .await
            .unwrap();

        let db = f.repository.database();
        let ids: Vec<_> = db
            .list_sessions()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![second.session_id.clone(), first.session_id.clone()]);

        assert!(db.delete_session(&first.session_id).await.unwrap());
        assert!(!db.delete_session(&first.session_id).await.unwrap());
        let orphans: i64 = db
            .execute("count sections", |conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM sections", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(orphans, 1);
    }
}
