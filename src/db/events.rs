//! Event persistence. Events are derived data and are rebuilt wholesale
//! by the batch detector.

use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::files::{file_from_row, FILE_COLUMNS};
use super::{Catalog, FileMeta};

#[derive(Debug, Clone)]
pub struct EventDraft {
    pub name: String,
    pub start_at: String,
    pub end_at: String,
    pub location: Option<String>,
    pub cover_file_id: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRow {
    pub id: i64,
    pub name: String,
    pub start_at: String,
    pub end_at: String,
    pub location: Option<String>,
    pub cover_file_id: Option<String>,
    pub photo_count: i64,
}

impl Catalog {
    pub fn replace_events(&self, drafts: &[EventDraft]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM event_files", [])?;
        tx.execute("DELETE FROM events", [])?;
        for draft in drafts {
            tx.execute(
                "INSERT INTO events (name, start_at, end_at, location, cover_file_id, photo_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    draft.name,
                    draft.start_at,
                    draft.end_at,
                    draft.location,
                    draft.cover_file_id,
                    draft.members.len() as i64
                ],
            )?;
            let event_id = tx.last_insert_rowid();
            for file_id in &draft.members {
                tx.execute(
                    "INSERT OR IGNORE INTO event_files (event_id, file_id) VALUES (?1, ?2)",
                    params![event_id, file_id],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_events(&self) -> Result<Vec<EventRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, start_at, end_at, location, cover_file_id, photo_count
             FROM events ORDER BY start_at DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(EventRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    start_at: row.get(2)?,
                    end_at: row.get(3)?,
                    location: row.get(4)?,
                    cover_file_id: row.get(5)?,
                    photo_count: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_event(&self, event_id: i64) -> Result<Option<EventRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, name, start_at, end_at, location, cover_file_id, photo_count
                 FROM events WHERE id = ?1",
                params![event_id],
                |row| {
                    Ok(EventRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        start_at: row.get(2)?,
                        end_at: row.get(3)?,
                        location: row.get(4)?,
                        cover_file_id: row.get(5)?,
                        photo_count: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn event_photos(&self, event_id: i64) -> Result<Vec<FileMeta>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             JOIN event_files ef ON ef.file_id = files.id
             WHERE ef.event_id = ?1 ORDER BY files.taken_at"
        ))?;
        let rows = stmt
            .query_map(params![event_id], file_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::seed_file;

    #[test]
    fn test_replace_events_rebuilds_wholesale() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_file(&catalog, "aa", "a.jpg", 1, 0);
        seed_file(&catalog, "bb", "b.jpg", 1, 0);

        let draft = EventDraft {
            name: "Paris, FR - Jul 1, 2024".into(),
            start_at: "2024-07-01T10:00:00+00:00".into(),
            end_at: "2024-07-01T10:10:00+00:00".into(),
            location: Some("Paris, FR".into()),
            cover_file_id: "aa".into(),
            members: vec!["aa".into(), "bb".into()],
        };
        catalog.replace_events(&[draft]).unwrap();

        let events = catalog.list_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].photo_count, 2);
        assert_eq!(catalog.event_photos(events[0].id).unwrap().len(), 2);

        catalog.replace_events(&[]).unwrap();
        assert!(catalog.list_events().unwrap().is_empty());
    }
}
