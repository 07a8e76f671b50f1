//! Catalog schema. Migrations are forward-only and versioned through
//! `PRAGMA user_version`; never edit a migration after it ships.

use anyhow::Result;
use rusqlite::Connection;

const MIGRATIONS: &[&str] = &[
    // Migration 1: initial schema
    r#"
    -- Files: the primary entity, keyed by content hash.
    CREATE TABLE files (
        id TEXT PRIMARY KEY,                  -- sha256 of file bytes, lowercase hex
        path TEXT NOT NULL,                   -- canonical path, relative to the photo root
        directory TEXT NOT NULL,
        file_name TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        mtime INTEGER NOT NULL,               -- unix seconds
        mime_type TEXT,
        width INTEGER,
        height INTEGER,
        taken_at TEXT,                        -- RFC 3339
        gps_latitude REAL,
        gps_longitude REAL,
        caption TEXT,
        is_favorite INTEGER NOT NULL DEFAULT 0,
        has_motion INTEGER NOT NULL DEFAULT 0,
        live_video TEXT,                      -- sidecar video, relative to the photo root
        motion_video TEXT,                    -- extracted artifact, relative to the data root
        missing_since TEXT,                   -- set when the canonical path vanished on disk
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        indexed_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE UNIQUE INDEX idx_files_path ON files(path);
    CREATE INDEX idx_files_directory ON files(directory);
    CREATE INDEX idx_files_taken_at ON files(taken_at);
    CREATE INDEX idx_files_size ON files(size_bytes DESC);

    -- Every path a content hash has been sighted at.
    CREATE TABLE file_paths (
        file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        path TEXT NOT NULL,
        PRIMARY KEY (file_id, path)
    );

    CREATE TABLE exif (
        file_id TEXT PRIMARY KEY REFERENCES files(id) ON DELETE CASCADE,
        camera_make TEXT,
        camera_model TEXT,
        lens_model TEXT,
        focal_length REAL,
        aperture REAL,
        shutter_speed TEXT,
        iso INTEGER,
        orientation INTEGER
    );

    CREATE TABLE locations (
        file_id TEXT PRIMARY KEY REFERENCES files(id) ON DELETE CASCADE,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        altitude REAL,
        country TEXT,
        city TEXT,
        address TEXT
    );

    CREATE INDEX idx_locations_place ON locations(country, city);

    CREATE TABLE thumbnails (
        file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        size INTEGER NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        rel_path TEXT NOT NULL,
        PRIMARY KEY (file_id, size)
    );

    CREATE TABLE phashes (
        file_id TEXT PRIMARY KEY REFERENCES files(id) ON DELETE CASCADE,
        phash INTEGER NOT NULL,
        ahash INTEGER NOT NULL,
        dhash INTEGER NOT NULL
    );

    CREATE TABLE duplicate_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE duplicate_members (
        group_id INTEGER NOT NULL REFERENCES duplicate_groups(id) ON DELETE CASCADE,
        file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        PRIMARY KEY (file_id)
    );

    CREATE INDEX idx_duplicate_members_group ON duplicate_members(group_id);

    CREATE TABLE persons (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT,
        representative_face_id INTEGER,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE faces (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        bbox_x INTEGER NOT NULL,
        bbox_y INTEGER NOT NULL,
        bbox_w INTEGER NOT NULL,
        bbox_h INTEGER NOT NULL,
        embedding BLOB NOT NULL,              -- 512 little-endian f32
        confidence REAL,
        person_id INTEGER REFERENCES persons(id) ON DELETE SET NULL,
        crop_path TEXT                        -- relative to the data root
    );

    CREATE INDEX idx_faces_file ON faces(file_id);
    CREATE INDEX idx_faces_person ON faces(person_id);

    CREATE TABLE tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE file_tags (
        file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
        PRIMARY KEY (file_id, tag_id)
    );

    CREATE TABLE events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        start_at TEXT NOT NULL,
        end_at TEXT NOT NULL,
        location TEXT,
        cover_file_id TEXT,
        photo_count INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE event_files (
        event_id INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
        file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        PRIMARY KEY (event_id, file_id)
    );

    -- The work ledger: one row per (file, stage). This table alone decides
    -- whether a stage runs for a file.
    CREATE TABLE stage_ledger (
        file_id TEXT NOT NULL,
        stage TEXT NOT NULL,
        status TEXT NOT NULL,                 -- pending/in_flight/done/failed/skipped
        stage_version INTEGER NOT NULL DEFAULT 1,
        attempts INTEGER NOT NULL DEFAULT 0,
        error_code TEXT,
        last_error TEXT,
        completed_at TEXT,
        updated_at TEXT NOT NULL DEFAULT (datetime('now')),
        PRIMARY KEY (file_id, stage)
    );

    CREATE INDEX idx_ledger_status ON stage_ledger(status);

    CREATE TABLE scan_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at TEXT NOT NULL DEFAULT (datetime('now')),
        finished_at TEXT,
        cancelled INTEGER NOT NULL DEFAULT 0,
        discovered INTEGER NOT NULL DEFAULT 0,
        hashed INTEGER NOT NULL DEFAULT 0,
        new_files INTEGER NOT NULL DEFAULT 0,
        errors INTEGER NOT NULL DEFAULT 0
    );
    "#,
];

fn schema_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

/// Apply pending migrations one-by-one.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current = schema_version(conn)?;
    let target = MIGRATIONS.len() as u32;

    if current > target {
        anyhow::bail!(
            "catalog schema version {current} is newer than this build supports (max {target})"
        );
    }

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as u32;
        if version <= current {
            continue;
        }
        conn.execute_batch(migration)?;
        conn.execute_batch(&format!("PRAGMA user_version = {version}"))?;
        tracing::info!(version, "Applied catalog migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply_and_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), MIGRATIONS.len() as u32);
        // Re-running applies nothing further.
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO files (id, path, directory, file_name, size_bytes, mtime)
             VALUES ('aa', 'x/a.jpg', 'x', 'a.jpg', 10, 0)",
            [],
        )
        .unwrap();
    }
}
