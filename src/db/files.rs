//! File records and identity assignment.

use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;

use super::{Catalog, FileId};
use crate::scanner::hashing::content_hash;

/// Filesystem mtimes are compared with a small tolerance; some
/// filesystems only keep 1-2 second precision.
const MTIME_TOLERANCE_SECS: i64 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct FileMeta {
    pub id: FileId,
    pub path: String,
    pub directory: String,
    pub file_name: String,
    pub size_bytes: i64,
    pub mtime: i64,
    pub mime_type: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub taken_at: Option<String>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub caption: Option<String>,
    pub is_favorite: bool,
    pub has_motion: bool,
    pub live_video: Option<String>,
    pub motion_video: Option<String>,
    pub missing_since: Option<String>,
    pub created_at: String,
    pub indexed_at: String,
}

pub(crate) const FILE_COLUMNS: &str = "id, path, directory, file_name, size_bytes, mtime, \
     mime_type, width, height, taken_at, gps_latitude, gps_longitude, caption, \
     is_favorite, has_motion, live_video, motion_video, missing_since, created_at, indexed_at";

pub(crate) fn file_from_row(row: &Row) -> rusqlite::Result<FileMeta> {
    Ok(FileMeta {
        id: row.get(0)?,
        path: row.get(1)?,
        directory: row.get(2)?,
        file_name: row.get(3)?,
        size_bytes: row.get(4)?,
        mtime: row.get(5)?,
        mime_type: row.get(6)?,
        width: row.get(7)?,
        height: row.get(8)?,
        taken_at: row.get(9)?,
        gps_latitude: row.get(10)?,
        gps_longitude: row.get(11)?,
        caption: row.get(12)?,
        is_favorite: row.get::<_, i64>(13)? != 0,
        has_motion: row.get::<_, i64>(14)? != 0,
        live_video: row.get(15)?,
        motion_video: row.get(16)?,
        missing_since: row.get(17)?,
        created_at: row.get(18)?,
        indexed_at: row.get(19)?,
    })
}

#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub id: FileId,
    /// True when a new File row was created for previously unseen content.
    pub created: bool,
    /// True when the file bytes had to be read to compute the identifier.
    pub hashed: bool,
}

impl Catalog {
    /// Assign or look up the identity of a sighted path.
    ///
    /// Identity is probed by (path, size, mtime) first: if an existing row
    /// matches the triple, its identifier is returned without reading the
    /// file. Only on mismatch or absence is the file hashed, then matched
    /// by content or inserted fresh. This single rule is what makes repeat
    /// scans of an unchanged tree cheap.
    pub fn upsert_file(
        &self,
        abs_path: &Path,
        rel_path: &str,
        size: u64,
        mtime: i64,
        mime: Option<&str>,
    ) -> Result<UpsertOutcome> {
        {
            let conn = self.conn();
            let probe: Option<(FileId, i64, i64)> = conn
                .query_row(
                    "SELECT id, size_bytes, mtime FROM files WHERE path = ?1",
                    params![rel_path],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            if let Some((id, db_size, db_mtime)) = probe {
                if db_size == size as i64 && (db_mtime - mtime).abs() <= MTIME_TOLERANCE_SECS {
                    return Ok(UpsertOutcome {
                        id,
                        created: false,
                        hashed: false,
                    });
                }
            }
        }

        // Triple mismatch or unknown path: the file must be read.
        let id = content_hash(abs_path)?;

        let conn = self.conn();
        let known: Option<String> = conn
            .query_row(
                "SELECT path FROM files WHERE id = ?1",
                params![&id],
                |row| row.get(0),
            )
            .optional()?;

        let directory = Path::new(rel_path)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let file_name = Path::new(rel_path)
            .file_name()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| rel_path.to_string());

        match known {
            Some(canonical) => {
                // Same content, possibly a new path or a touched mtime.
                conn.execute(
                    "INSERT OR IGNORE INTO file_paths (file_id, path) VALUES (?1, ?2)",
                    params![&id, rel_path],
                )?;
                if canonical == rel_path {
                    conn.execute(
                        "UPDATE files SET size_bytes = ?2, mtime = ?3, missing_since = NULL
                         WHERE id = ?1",
                        params![&id, size as i64, mtime],
                    )?;
                } else {
                    // Repoint the canonical path when the recorded one is
                    // gone (file moved) or previously marked missing.
                    let stale: bool = conn
                        .query_row(
                            "SELECT missing_since IS NOT NULL FROM files WHERE id = ?1",
                            params![&id],
                            |row| row.get(0),
                        )
                        .optional()?
                        .unwrap_or(false);
                    if stale {
                        conn.execute(
                            "UPDATE files SET path = ?2, directory = ?3, file_name = ?4,
                                 size_bytes = ?5, mtime = ?6, missing_since = NULL
                             WHERE id = ?1",
                            params![&id, rel_path, directory, file_name, size as i64, mtime],
                        )?;
                    }
                }
                Ok(UpsertOutcome {
                    id,
                    created: false,
                    hashed: true,
                })
            }
            None => {
                // A path may be reused for new content; the old row keeps
                // its identity and loses the canonical claim on the path.
                conn.execute(
                    "UPDATE files SET missing_since = datetime('now'),
                         path = path || '#replaced:' || id
                     WHERE path = ?1",
                    params![rel_path],
                )?;
                conn.execute(
                    "INSERT INTO files (id, path, directory, file_name, size_bytes, mtime, mime_type)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![&id, rel_path, directory, file_name, size as i64, mtime, mime],
                )?;
                conn.execute(
                    "INSERT OR IGNORE INTO file_paths (file_id, path) VALUES (?1, ?2)",
                    params![&id, rel_path],
                )?;
                Ok(UpsertOutcome {
                    id,
                    created: true,
                    hashed: true,
                })
            }
        }
    }

    pub fn get_file(&self, id: &str) -> Result<Option<FileMeta>> {
        let conn = self.conn();
        let meta = conn
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"),
                params![id],
                file_from_row,
            )
            .optional()?;
        Ok(meta)
    }

    /// All (id, canonical path) pairs, for the startup reconcile and the
    /// watcher's change sweep.
    pub fn all_path_triples(&self) -> Result<Vec<(FileId, String, i64, i64)>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, path, size_bytes, mtime FROM files WHERE missing_since IS NULL")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn mark_missing(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE files SET missing_since = datetime('now')
             WHERE id = ?1 AND missing_since IS NULL",
            params![id],
        )?;
        Ok(())
    }

    /// Toggle the favorite flag; returns the new value.
    pub fn toggle_favorite(&self, id: &str) -> Result<Option<bool>> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE files SET is_favorite = 1 - is_favorite WHERE id = ?1",
            params![id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        let value: i64 = conn.query_row(
            "SELECT is_favorite FROM files WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(Some(value != 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[test]
    fn test_probe_skips_hashing_on_unchanged_triple() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let abs = write_file(dir.path(), "a.jpg", b"photo-bytes");

        let first = catalog
            .upsert_file(&abs, "a.jpg", 11, 1_700_000_000, Some("image/jpeg"))
            .unwrap();
        assert!(first.created);
        assert!(first.hashed);

        let second = catalog
            .upsert_file(&abs, "a.jpg", 11, 1_700_000_000, Some("image/jpeg"))
            .unwrap();
        assert_eq!(second.id, first.id);
        assert!(!second.created);
        assert!(!second.hashed, "unchanged triple must not re-hash");

        // mtime within tolerance also probes clean.
        let third = catalog
            .upsert_file(&abs, "a.jpg", 11, 1_700_000_001, None)
            .unwrap();
        assert!(!third.hashed);
    }

    #[test]
    fn test_identical_content_gets_identical_id() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let a = write_file(dir.path(), "a.jpg", b"same-bytes");
        let b = write_file(dir.path(), "b.jpg", b"same-bytes");

        let first = catalog.upsert_file(&a, "a.jpg", 10, 100, None).unwrap();
        let second = catalog.upsert_file(&b, "b.jpg", 10, 100, None).unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.created);
        assert!(!second.created, "same content joins the existing row");
    }

    #[test]
    fn test_touched_mtime_same_content_keeps_identity() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let abs = write_file(dir.path(), "a.jpg", b"stable");

        let first = catalog.upsert_file(&abs, "a.jpg", 6, 100, None).unwrap();
        // mtime changed well past tolerance, content identical.
        let second = catalog.upsert_file(&abs, "a.jpg", 6, 10_000, None).unwrap();
        assert_eq!(second.id, first.id);
        assert!(second.hashed, "triple mismatch forces a hash");
        assert!(!second.created);
    }

    #[test]
    fn test_changed_content_same_path_gets_new_identity() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let abs = write_file(dir.path(), "a.jpg", b"version-one");
        let first = catalog.upsert_file(&abs, "a.jpg", 11, 100, None).unwrap();

        std::fs::write(&abs, b"version-two!").unwrap();
        let second = catalog.upsert_file(&abs, "a.jpg", 12, 200, None).unwrap();
        assert_ne!(second.id, first.id);
        assert!(second.created);

        // The new row owns the canonical path.
        let meta = catalog.get_file(&second.id).unwrap().unwrap();
        assert_eq!(meta.path, "a.jpg");
    }

    #[test]
    fn test_favorite_toggle_is_involutive() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let abs = write_file(dir.path(), "a.jpg", b"fav");
        let up = catalog.upsert_file(&abs, "a.jpg", 3, 0, None).unwrap();

        assert_eq!(catalog.toggle_favorite(&up.id).unwrap(), Some(true));
        assert_eq!(catalog.toggle_favorite(&up.id).unwrap(), Some(false));
        assert_eq!(catalog.toggle_favorite("missing").unwrap(), None);
    }
}
