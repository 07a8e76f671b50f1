//! Duplicate-group persistence. The in-memory union-find is the working
//! structure; this module snapshots its equivalence classes wholesale.

use anyhow::Result;
use rusqlite::params;
use serde::Serialize;

use super::files::{file_from_row, FILE_COLUMNS};
use super::{Catalog, FileMeta};

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroupRow {
    pub id: i64,
    pub members: Vec<FileMeta>,
}

impl Catalog {
    /// Replace all duplicate groups with the given equivalence classes.
    /// Singleton classes are not persisted.
    pub fn replace_duplicate_groups(&self, groups: &[Vec<String>]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM duplicate_members", [])?;
        tx.execute("DELETE FROM duplicate_groups", [])?;
        for group in groups.iter().filter(|g| g.len() > 1) {
            tx.execute("INSERT INTO duplicate_groups DEFAULT VALUES", [])?;
            let group_id = tx.last_insert_rowid();
            for file_id in group {
                tx.execute(
                    "INSERT OR REPLACE INTO duplicate_members (group_id, file_id) VALUES (?1, ?2)",
                    params![group_id, file_id],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_duplicate_groups(&self) -> Result<Vec<DuplicateGroupRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id FROM duplicate_groups ORDER BY id",
        )?;
        let group_ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut members_stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             JOIN duplicate_members dm ON dm.file_id = files.id
             WHERE dm.group_id = ?1 ORDER BY files.size_bytes DESC"
        ))?;

        let mut groups = Vec::with_capacity(group_ids.len());
        for id in group_ids {
            let members = members_stmt
                .query_map(params![id], file_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            groups.push(DuplicateGroupRow { id, members });
        }
        Ok(groups)
    }

    pub fn duplicate_group_of(&self, file_id: &str) -> Result<Option<i64>> {
        use rusqlite::OptionalExtension;
        let group = self
            .conn()
            .query_row(
                "SELECT group_id FROM duplicate_members WHERE file_id = ?1",
                params![file_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::seed_file;

    #[test]
    fn test_replace_groups_ignores_singletons() {
        let catalog = Catalog::open_in_memory().unwrap();
        for id in ["aa", "bb", "cc"] {
            seed_file(&catalog, id, &format!("{id}.jpg"), 1, 0);
        }

        catalog
            .replace_duplicate_groups(&[
                vec!["aa".into(), "bb".into()],
                vec!["cc".into()], // singleton, dropped
            ])
            .unwrap();

        let groups = catalog.list_duplicate_groups().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 2);
        assert!(catalog.duplicate_group_of("aa").unwrap().is_some());
        assert!(catalog.duplicate_group_of("cc").unwrap().is_none());

        // Rewriting replaces the previous snapshot.
        catalog
            .replace_duplicate_groups(&[vec!["aa".into(), "bb".into(), "cc".into()]])
            .unwrap();
        let groups = catalog.list_duplicate_groups().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 3);
    }
}
