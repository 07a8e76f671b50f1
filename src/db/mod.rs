//! The catalog: durable state for files, derived artifacts metadata and
//! the per-stage work ledger. Single writer, many readers; every write is
//! durable before the call returns.

mod dupes;
mod events;
mod faces;
mod files;
mod ledger;
mod media;
mod queries;
mod schema;
mod tags;

pub use dupes::DuplicateGroupRow;
pub use events::{EventDraft, EventRow};
pub use faces::{blob_to_embedding, embedding_to_blob, FaceRow, NewFace, PersonSummary};
pub use files::{FileMeta, UpsertOutcome};
pub use ledger::{Disposition, FailedItem, StageStatus};
pub use media::{ExifData, MotionResult, ThumbMeta};
pub use queries::{
    DirectoryCount, LibraryStats, MapPoint, PhotoFilter, PhotoPage, PlaceCount, TimelineBucket,
};
pub use tags::TagCount;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// File identifier: sha256 of the file bytes, lowercase hex.
pub type FileId = String;

pub struct Catalog {
    conn: Mutex<Connection>,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open catalog at {}", path.display()))?;
        Self::init(conn)
    }

    /// In-memory catalog for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // WAL keeps readers off the writer's back; FULL sync keeps every
        // committed ledger row crash-durable.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA foreign_keys = ON;",
        )?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Destructive: drop every derived row. The photo root is untouched;
    /// a subsequent scan rebuilds from scratch.
    pub fn clear_index(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "DELETE FROM event_files;
             DELETE FROM events;
             DELETE FROM file_tags;
             DELETE FROM tags;
             DELETE FROM faces;
             DELETE FROM persons;
             DELETE FROM duplicate_members;
             DELETE FROM duplicate_groups;
             DELETE FROM phashes;
             DELETE FROM thumbnails;
             DELETE FROM locations;
             DELETE FROM exif;
             DELETE FROM stage_ledger;
             DELETE FROM file_paths;
             DELETE FROM files;",
        )?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Insert a minimal file row for ledger/query tests.
    pub fn seed_file(catalog: &Catalog, id: &str, path: &str, size: i64, mtime: i64) {
        catalog
            .conn()
            .execute(
                "INSERT INTO files (id, path, directory, file_name, size_bytes, mtime)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id,
                    path,
                    std::path::Path::new(path)
                        .parent()
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    std::path::Path::new(path)
                        .file_name()
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    size,
                    mtime
                ],
            )
            .unwrap();
    }
}
