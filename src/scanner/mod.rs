//! Discovery source: full walks, single-file indexing shared with the
//! watcher, and the startup reconcile.

pub mod discovery;
pub mod hashing;
pub mod watcher;

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::db::{Catalog, UpsertOutcome};

pub use discovery::DiscoveredFile;

/// Emitted for every file the walk touches, in stream order.
pub enum ScanEvent<'a> {
    /// A supported file was sighted and identity-resolved. `needs_work`
    /// is true when at least one stage still has to run for it.
    Discovered {
        file: &'a DiscoveredFile,
        outcome: &'a UpsertOutcome,
        needs_work: bool,
    },
    /// Indexing a path failed; the walk continues.
    Error { path: &'a str },
}

#[derive(Debug, Default, Clone)]
pub struct WalkStats {
    pub discovered: u64,
    pub hashed: u64,
    pub new_files: u64,
    pub errors: u64,
    pub cancelled: bool,
}

pub struct Scanner {
    catalog: Arc<Catalog>,
    config: Arc<Config>,
}

impl Scanner {
    pub fn new(catalog: Arc<Catalog>, config: Arc<Config>) -> Self {
        Self { catalog, config }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Resolve one sighted file against the catalog. Returns the upsert
    /// outcome plus whether the pipeline still owes this file work.
    pub fn index_file(&self, found: &DiscoveredFile) -> Result<(UpsertOutcome, bool)> {
        let mime = discovery::mime_for(&found.abs_path);
        let outcome = self.catalog.upsert_file(
            &found.abs_path,
            &found.rel_path,
            found.size,
            found.mtime,
            mime,
        )?;
        let needs_work = outcome.created || !self.catalog.ledger_complete(&outcome.id)?;
        Ok((outcome, needs_work))
    }

    /// Full recursive walk. Each path is indexed and reported immediately
    /// as encountered; the caller enqueues files that need work. Runs only
    /// on explicit trigger, never automatically at startup.
    pub fn full_walk(
        &self,
        cancel: &AtomicBool,
        mut on_event: impl FnMut(ScanEvent<'_>),
    ) -> WalkStats {
        let mut stats = WalkStats::default();

        let completed = discovery::walk_photos(&self.config, |found| {
            if cancel.load(Ordering::SeqCst) {
                return false;
            }
            stats.discovered += 1;
            match self.index_file(&found) {
                Ok((outcome, needs_work)) => {
                    if outcome.hashed {
                        stats.hashed += 1;
                    }
                    if outcome.created {
                        stats.new_files += 1;
                    }
                    on_event(ScanEvent::Discovered {
                        file: &found,
                        outcome: &outcome,
                        needs_work,
                    });
                }
                Err(e) => {
                    stats.errors += 1;
                    tracing::error!(path = %found.rel_path, error = %e, "Error indexing file");
                    on_event(ScanEvent::Error {
                        path: &found.rel_path,
                    });
                }
            }
            true
        });

        stats.cancelled = !completed;

        // Files whose canonical path vanished are marked, not deleted.
        // Skipped on cancellation so a partial walk cannot mass-mark.
        if !stats.cancelled {
            match self.reconcile() {
                Ok(marked) if marked > 0 => {
                    tracing::info!(marked, "Marked files with missing paths");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Path reconcile failed"),
            }
        }

        stats
    }

    /// Lightweight reconcile: iterate known rows and mark those whose
    /// on-disk path no longer exists. No hashing, no reprocessing.
    pub fn reconcile(&self) -> Result<usize> {
        let mut marked = 0;
        for (id, rel_path, _, _) in self.catalog.all_path_triples()? {
            if !self.config.photos_path.join(&rel_path).exists() {
                self.catalog.mark_missing(&id)?;
                marked += 1;
            }
        }
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tempfile::tempdir;

    fn setup(dir: &std::path::Path) -> Scanner {
        let config = Arc::new(Config {
            photos_path: dir.to_path_buf(),
            ..Config::default()
        });
        let catalog = Arc::new(Catalog::open_in_memory().unwrap());
        Scanner::new(catalog, config)
    }

    #[test]
    fn test_full_walk_emits_then_rescan_is_quiet() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"aaa").unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"bbb").unwrap();
        let scanner = setup(dir.path());
        let cancel = AtomicBool::new(false);

        let mut needs = 0;
        let stats = scanner.full_walk(&cancel, |event| {
            if let ScanEvent::Discovered { needs_work, .. } = event {
                if needs_work {
                    needs += 1;
                }
            }
        });
        assert_eq!(stats.discovered, 2);
        assert_eq!(stats.new_files, 2);
        assert_eq!(stats.hashed, 2);
        assert_eq!(needs, 2);

        // Unchanged tree: triple probe hits, zero hashing.
        let stats = scanner.full_walk(&cancel, |_| {});
        assert_eq!(stats.discovered, 2);
        assert_eq!(stats.hashed, 0);
        assert_eq!(stats.new_files, 0);
    }

    #[test]
    fn test_cancelled_walk_reports_cancelled() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"aaa").unwrap();
        let scanner = setup(dir.path());
        let cancel = AtomicBool::new(true);

        let stats = scanner.full_walk(&cancel, |_| {});
        assert!(stats.cancelled);
        assert_eq!(stats.discovered, 0);
    }

    #[test]
    fn test_reconcile_marks_removed_paths() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("gone.jpg");
        std::fs::write(&gone, b"bytes").unwrap();
        let scanner = setup(dir.path());
        let cancel = AtomicBool::new(false);
        scanner.full_walk(&cancel, |_| {});

        std::fs::remove_file(&gone).unwrap();
        assert_eq!(scanner.reconcile().unwrap(), 1);
        // Already-marked rows are not re-marked.
        assert_eq!(scanner.reconcile().unwrap(), 0);
    }
}
