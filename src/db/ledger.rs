//! The work ledger: per-(file, stage) status rows, the single source of
//! truth for "already done". Scan-run bookkeeping lives here too.

use anyhow::Result;
use rusqlite::{params, OptionalExtension, Transaction};
use serde::Serialize;

use super::Catalog;
use crate::pipeline::{self, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Pending,
    InFlight,
    Done,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InFlight => "in_flight",
            StageStatus::Done => "done",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }
}

/// What a worker should do with a dequeued file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Run the stage body.
    Run,
    /// Terminal row already present: emit downstream without work.
    FastForward,
    /// Another worker holds it; drop silently.
    InFlight,
}

/// Mark a ledger row done inside an open transaction. Stage committers
/// call this so result rows and the `done` mark land atomically.
pub(crate) fn ledger_done_tx(tx: &Transaction, file_id: &str, stage: Stage) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO stage_ledger (file_id, stage, status, stage_version, completed_at, updated_at)
         VALUES (?1, ?2, 'done', ?3, datetime('now'), datetime('now'))
         ON CONFLICT (file_id, stage) DO UPDATE SET
             status = 'done', stage_version = ?3, error_code = NULL, last_error = NULL,
             completed_at = datetime('now'), updated_at = datetime('now')",
        params![file_id, stage.as_str(), pipeline::spec(stage).version],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    pub file_id: String,
    pub path: Option<String>,
    pub stage: String,
    pub attempts: i64,
    pub error_code: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: String,
}

impl Catalog {
    /// Decide whether a stage must execute for a file.
    ///
    /// True when the row is absent, pending, or failed with attempts left.
    /// A stored stage-version older than the current one also returns true
    /// and clears the stale row.
    pub fn stage_needed(&self, file_id: &str, stage: Stage) -> Result<bool> {
        Ok(self.stage_disposition(file_id, stage)? == Disposition::Run)
    }

    pub fn stage_disposition(&self, file_id: &str, stage: Stage) -> Result<Disposition> {
        let spec = pipeline::spec(stage);
        let conn = self.conn();
        let row: Option<(String, i64, i64)> = conn
            .query_row(
                "SELECT status, stage_version, attempts FROM stage_ledger
                 WHERE file_id = ?1 AND stage = ?2",
                params![file_id, stage.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((status, version, attempts)) = row else {
            return Ok(Disposition::Run);
        };

        if version != spec.version {
            conn.execute(
                "DELETE FROM stage_ledger WHERE file_id = ?1 AND stage = ?2",
                params![file_id, stage.as_str()],
            )?;
            return Ok(Disposition::Run);
        }

        Ok(match status.as_str() {
            "done" | "skipped" => Disposition::FastForward,
            "failed" => {
                if attempts < spec.max_attempts as i64 {
                    Disposition::Run
                } else {
                    Disposition::FastForward
                }
            }
            "in_flight" => Disposition::InFlight,
            _ => Disposition::Run,
        })
    }

    pub fn mark_stage(
        &self,
        file_id: &str,
        stage: Stage,
        status: StageStatus,
        error: Option<(&str, &str)>,
    ) -> Result<()> {
        let (code, message) = match error {
            Some((c, m)) => (Some(c), Some(m)),
            None => (None, None),
        };
        let completed = matches!(
            status,
            StageStatus::Done | StageStatus::Failed | StageStatus::Skipped
        );
        self.conn().execute(
            "INSERT INTO stage_ledger
                 (file_id, stage, status, stage_version, error_code, last_error, completed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6,
                 CASE WHEN ?7 THEN datetime('now') ELSE NULL END, datetime('now'))
             ON CONFLICT (file_id, stage) DO UPDATE SET
                 status = ?3, stage_version = ?4, error_code = ?5, last_error = ?6,
                 completed_at = CASE WHEN ?7 THEN datetime('now') ELSE completed_at END,
                 updated_at = datetime('now')",
            params![
                file_id,
                stage.as_str(),
                status.as_str(),
                pipeline::spec(stage).version,
                code,
                message,
                completed,
            ],
        )?;
        Ok(())
    }

    /// Record a transient failure. Increments the attempt counter and
    /// returns its new value; the row ends up `failed` either way, and
    /// `stage_disposition` decides whether attempts remain.
    pub fn record_attempt(&self, file_id: &str, stage: Stage, code: &str, message: &str) -> Result<u32> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO stage_ledger
                 (file_id, stage, status, stage_version, attempts, error_code, last_error, updated_at)
             VALUES (?1, ?2, 'failed', ?3, 1, ?4, ?5, datetime('now'))
             ON CONFLICT (file_id, stage) DO UPDATE SET
                 status = 'failed', stage_version = ?3, attempts = attempts + 1,
                 error_code = ?4, last_error = ?5, updated_at = datetime('now')",
            params![
                file_id,
                stage.as_str(),
                pipeline::spec(stage).version,
                code,
                message
            ],
        )?;
        let attempts: i64 = conn.query_row(
            "SELECT attempts FROM stage_ledger WHERE file_id = ?1 AND stage = ?2",
            params![file_id, stage.as_str()],
            |row| row.get(0),
        )?;
        Ok(attempts as u32)
    }

    /// One-shot startup sweep: anything a crashed worker left `in_flight`
    /// goes back to `pending`. No filesystem access.
    pub fn demote_in_flight(&self) -> Result<usize> {
        let count = self.conn().execute(
            "UPDATE stage_ledger SET status = 'pending', updated_at = datetime('now')
             WHERE status = 'in_flight'",
            [],
        )?;
        Ok(count)
    }

    /// True when every stage has a terminal row for this file. Discovery
    /// uses this to avoid re-enqueuing fully processed files.
    pub fn ledger_complete(&self, file_id: &str) -> Result<bool> {
        let conn = self.conn();
        let terminal: i64 = conn.query_row(
            "SELECT COUNT(*) FROM stage_ledger
             WHERE file_id = ?1 AND status IN ('done', 'skipped', 'failed')",
            params![file_id],
            |row| row.get(0),
        )?;
        Ok(terminal as usize >= Stage::ALL.len())
    }

    /// Failed rows with their filenames, for inspection in the UI.
    pub fn failed_items(&self, limit: u32) -> Result<Vec<FailedItem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT l.file_id, f.path, l.stage, l.attempts, l.error_code, l.last_error, l.updated_at
             FROM stage_ledger l LEFT JOIN files f ON f.id = l.file_id
             WHERE l.status = 'failed'
             ORDER BY l.updated_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(FailedItem {
                    file_id: row.get(0)?,
                    path: row.get(1)?,
                    stage: row.get(2)?,
                    attempts: row.get(3)?,
                    error_code: row.get(4)?,
                    last_error: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Number of files whose every stage has reached a terminal status.
    pub fn count_files_settled(&self) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM (
                 SELECT file_id FROM stage_ledger
                 WHERE status IN ('done', 'skipped', 'failed')
                 GROUP BY file_id HAVING COUNT(*) >= ?1
             )",
            params![Stage::ALL.len() as i64],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn create_scan_run(&self) -> Result<i64> {
        let conn = self.conn();
        conn.execute("INSERT INTO scan_runs DEFAULT VALUES", [])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finish_scan_run(
        &self,
        run_id: i64,
        cancelled: bool,
        discovered: u64,
        hashed: u64,
        new_files: u64,
        errors: u64,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE scan_runs SET finished_at = datetime('now'), cancelled = ?2,
                 discovered = ?3, hashed = ?4, new_files = ?5, errors = ?6
             WHERE id = ?1",
            params![
                run_id,
                cancelled,
                discovered as i64,
                hashed as i64,
                new_files as i64,
                errors as i64
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::seed_file;

    #[test]
    fn test_absent_row_means_run() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_file(&catalog, "aa", "a.jpg", 1, 0);
        assert!(catalog.stage_needed("aa", Stage::Exif).unwrap());
    }

    #[test]
    fn test_done_and_skipped_are_terminal() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_file(&catalog, "aa", "a.jpg", 1, 0);

        catalog
            .mark_stage("aa", Stage::Exif, StageStatus::Done, None)
            .unwrap();
        assert!(!catalog.stage_needed("aa", Stage::Exif).unwrap());

        catalog
            .mark_stage("aa", Stage::Thumbs, StageStatus::Skipped, Some(("decode", "bad header")))
            .unwrap();
        assert_eq!(
            catalog.stage_disposition("aa", Stage::Thumbs).unwrap(),
            Disposition::FastForward
        );
    }

    #[test]
    fn test_failed_retries_until_attempts_exhausted() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_file(&catalog, "aa", "a.jpg", 1, 0);

        let max = crate::pipeline::spec(Stage::Exif).max_attempts;
        for attempt in 1..=max {
            let n = catalog
                .record_attempt("aa", Stage::Exif, "transient_io", "flaky disk")
                .unwrap();
            assert_eq!(n, attempt);
            let needed = catalog.stage_needed("aa", Stage::Exif).unwrap();
            assert_eq!(needed, attempt < max);
        }
    }

    #[test]
    fn test_version_bump_invalidates_done_row() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_file(&catalog, "aa", "a.jpg", 1, 0);
        catalog
            .mark_stage("aa", Stage::Phash, StageStatus::Done, None)
            .unwrap();

        // Simulate a shipped version bump by rewriting the stored version.
        catalog
            .conn()
            .execute(
                "UPDATE stage_ledger SET stage_version = stage_version - 1
                 WHERE file_id = 'aa' AND stage = 'hashing'",
                [],
            )
            .unwrap();

        assert!(catalog.stage_needed("aa", Stage::Phash).unwrap());
        // The stale row was cleared along the way.
        let count: i64 = catalog
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM stage_ledger WHERE file_id = 'aa' AND stage = 'hashing'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_demote_in_flight_on_startup() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_file(&catalog, "aa", "a.jpg", 1, 0);
        catalog
            .mark_stage("aa", Stage::Thumbs, StageStatus::InFlight, None)
            .unwrap();

        assert_eq!(catalog.demote_in_flight().unwrap(), 1);
        assert!(catalog.stage_needed("aa", Stage::Thumbs).unwrap());
    }

    #[test]
    fn test_ledger_complete_requires_all_stages_terminal() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_file(&catalog, "aa", "a.jpg", 1, 0);
        assert!(!catalog.ledger_complete("aa").unwrap());

        for stage in Stage::ALL {
            catalog
                .mark_stage("aa", stage, StageStatus::Done, None)
                .unwrap();
        }
        assert!(catalog.ledger_complete("aa").unwrap());
    }
}
