//! AI-assigned tags.

use anyhow::Result;
use rusqlite::{params, OptionalExtension, Transaction};
use serde::Serialize;

use super::ledger::ledger_done_tx;
use super::Catalog;
use crate::pipeline::Stage;

#[derive(Debug, Clone, Serialize)]
pub struct TagCount {
    pub id: i64,
    pub name: String,
    pub photo_count: i64,
}

fn ensure_tag(tx: &Transaction, name: &str) -> rusqlite::Result<i64> {
    if let Some(id) = tx
        .query_row("SELECT id FROM tags WHERE name = ?1", params![name], |row| {
            row.get(0)
        })
        .optional()?
    {
        return Ok(id);
    }
    tx.execute("INSERT INTO tags (name) VALUES (?1)", params![name])?;
    Ok(tx.last_insert_rowid())
}

impl Catalog {
    /// Replace a file's tag set and mark the stage done.
    pub fn write_tags(&self, file_id: &str, tags: &[String]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM file_tags WHERE file_id = ?1", params![file_id])?;
        for name in tags {
            let tag_id = ensure_tag(&tx, name)?;
            tx.execute(
                "INSERT OR IGNORE INTO file_tags (file_id, tag_id) VALUES (?1, ?2)",
                params![file_id, tag_id],
            )?;
        }
        ledger_done_tx(&tx, file_id, Stage::Tags)?;
        tx.commit()?;
        Ok(())
    }

    pub fn tags_for_file(&self, file_id: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t.name FROM tags t
             JOIN file_tags ft ON ft.tag_id = t.id
             WHERE ft.file_id = ?1 ORDER BY t.name",
        )?;
        let rows = stmt
            .query_map(params![file_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_tags(&self) -> Result<Vec<TagCount>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.name, COUNT(ft.file_id)
             FROM tags t LEFT JOIN file_tags ft ON ft.tag_id = t.id
             GROUP BY t.id HAVING COUNT(ft.file_id) > 0
             ORDER BY COUNT(ft.file_id) DESC, t.name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TagCount {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    photo_count: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::seed_file;

    #[test]
    fn test_write_tags_replaces_and_reuses_names() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_file(&catalog, "aa", "a.jpg", 1, 0);
        seed_file(&catalog, "bb", "b.jpg", 1, 0);

        catalog
            .write_tags("aa", &["beach".into(), "sunset".into()])
            .unwrap();
        catalog.write_tags("bb", &["beach".into()]).unwrap();
        assert!(!catalog.stage_needed("aa", Stage::Tags).unwrap());

        let tags = catalog.list_tags().unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].name, "beach");
        assert_eq!(tags[0].photo_count, 2);

        // Replacing drops stale associations.
        catalog.write_tags("aa", &["mountain".into()]).unwrap();
        assert_eq!(catalog.tags_for_file("aa").unwrap(), vec!["mountain"]);
    }
}
