//! Filesystem watch: a debounced polling sweep that compares the photo
//! tree against the catalog and feeds changed paths into the same
//! discovery entry point the full walk uses.
//!
//! The poll interval doubles as the coalescing window: however many
//! writes land between two sweeps, each changed file is indexed once.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::config::Config;
use crate::pipeline::Supervisor;

use super::{discovery, Scanner};

/// Files modified this close to "now" may still be mid-write; they are
/// picked up on the next sweep.
const SETTLE_SECS: i64 = 2;

/// Matches the probe tolerance in the catalog.
const MTIME_TOLERANCE_SECS: i64 = 2;

pub fn spawn(
    supervisor: Arc<Supervisor>,
    scanner: Arc<Scanner>,
    config: Arc<Config>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("fs-watcher".into())
        .spawn(move || {
            tracing::info!(
                interval = config.watch_interval,
                path = %config.photos_path.display(),
                "File watcher started"
            );
            loop {
                // Sleep in one-second slices so shutdown stays responsive.
                for _ in 0..config.watch_interval.max(1) {
                    if supervisor.shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    std::thread::sleep(Duration::from_secs(1));
                }

                // A full walk already covers everything a sweep would.
                if supervisor.is_scanning() {
                    continue;
                }

                match sweep(&supervisor, &scanner, &config) {
                    Ok(0) => {}
                    Ok(changed) => {
                        tracing::info!(changed, "Watcher picked up changed files");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Watcher sweep failed");
                    }
                }
            }
        })
        .expect("failed to spawn fs watcher")
}

fn sweep(
    supervisor: &Arc<Supervisor>,
    scanner: &Scanner,
    config: &Config,
) -> anyhow::Result<usize> {
    let known: HashMap<String, (i64, i64)> = scanner
        .catalog()
        .all_path_triples()?
        .into_iter()
        .map(|(_, path, size, mtime)| (path, (size, mtime)))
        .collect();

    let now = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let mut changed = 0usize;
    discovery::walk_photos(config, |found| {
        if supervisor.shutdown.load(Ordering::SeqCst) {
            return false;
        }

        let unchanged = known
            .get(&found.rel_path)
            .map(|(size, mtime)| {
                *size == found.size as i64 && (mtime - found.mtime).abs() <= MTIME_TOLERANCE_SECS
            })
            .unwrap_or(false);
        if unchanged {
            return true;
        }
        if now - found.mtime < SETTLE_SECS {
            return true; // likely still being written
        }

        match scanner.index_file(&found) {
            Ok((outcome, needs_work)) => {
                changed += 1;
                tracing::info!(path = %found.rel_path, id = %outcome.id, "Detected file change");
                if needs_work {
                    supervisor.enqueue_discovered(&outcome.id);
                }
            }
            Err(e) => {
                tracing::error!(path = %found.rel_path, error = %e, "Error indexing changed file");
            }
        }
        true
    });

    Ok(changed)
}
