//! The pipeline supervisor: owns queues, worker pools, the cancel token
//! and scan-run lifecycle, and composes progress snapshots.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::events;
use crate::faces::clustering;
use crate::scanner::{ScanEvent, Scanner};
use crate::stages::StageCtx;

use super::queue::StageQueue;
use super::stats::{self, PipelineSnapshot, QueueSnapshot, ScanSnapshot};
use super::{Stage, DISCOVERY_FANOUT, QUEUE_CAPACITY};

pub struct Supervisor {
    ctx: Arc<StageCtx>,
    scanner: Arc<Scanner>,
    queues: Vec<Arc<StageQueue>>,

    /// Cancel token for the active scan run; cooperative, not pre-emptive.
    pub cancel: Arc<AtomicBool>,
    /// Process-wide stop for worker pools and monitors.
    pub shutdown: Arc<AtomicBool>,

    scanning: AtomicBool,
    discovery_done: AtomicBool,
    /// Work has arrived since the last settle batch.
    settle_pending: AtomicBool,

    run_id: Mutex<Option<i64>>,
    scan_started_at: Mutex<Option<DateTime<Utc>>>,
    current_scan_file: Mutex<Option<String>>,
    discovered: AtomicU64,
    hashed: AtomicU64,
    new_files: AtomicU64,
    scan_errors: AtomicU64,

    total_discovered: AtomicU64,
    started_at: Mutex<Option<DateTime<Utc>>>,
    completed_at: Mutex<Option<DateTime<Utc>>>,
}

impl Supervisor {
    pub fn new(ctx: Arc<StageCtx>, scanner: Arc<Scanner>) -> Arc<Self> {
        let queues = Stage::ALL
            .iter()
            .map(|stage| Arc::new(StageQueue::new(*stage, QUEUE_CAPACITY)))
            .collect();

        Arc::new(Self {
            cancel: ctx.cancel.clone(),
            ctx,
            scanner,
            queues,
            shutdown: Arc::new(AtomicBool::new(false)),
            scanning: AtomicBool::new(false),
            discovery_done: AtomicBool::new(false),
            settle_pending: AtomicBool::new(false),
            run_id: Mutex::new(None),
            scan_started_at: Mutex::new(None),
            current_scan_file: Mutex::new(None),
            discovered: AtomicU64::new(0),
            hashed: AtomicU64::new(0),
            new_files: AtomicU64::new(0),
            scan_errors: AtomicU64::new(0),
            total_discovered: AtomicU64::new(0),
            started_at: Mutex::new(None),
            completed_at: Mutex::new(None),
        })
    }

    /// Spawn all worker pools and the settle monitor. Idempotent per
    /// process: call once from startup.
    pub fn start(self: &Arc<Self>) {
        super::worker::spawn_pools(self);

        let supervisor = self.clone();
        std::thread::Builder::new()
            .name("settle-monitor".into())
            .spawn(move || supervisor.settle_loop())
            .expect("failed to spawn settle monitor");

        tracing::info!("Pipeline started");
    }

    pub(super) fn ctx(&self) -> Arc<StageCtx> {
        self.ctx.clone()
    }

    pub fn queue(&self, stage: Stage) -> Arc<StageQueue> {
        self.queues[stage.index()].clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Feed a discovered identifier into the graph's entry stages.
    pub fn enqueue_discovered(&self, file_id: &str) {
        self.note_activity();
        self.total_discovered.fetch_add(1, Ordering::SeqCst);
        self.fan_out(DISCOVERY_FANOUT, file_id);
    }

    pub(super) fn fan_out(&self, downstream: &[Stage], file_id: &str) {
        for stage in downstream {
            self.queues[stage.index()].push(file_id, &self.cancel);
        }
    }

    fn note_activity(&self) {
        self.settle_pending.store(true, Ordering::SeqCst);
        let mut started = self.started_at.lock().unwrap();
        if started.is_none() {
            *started = Some(Utc::now());
        }
        *self.completed_at.lock().unwrap() = None;
    }

    /// Start a scan run. Refuses when one is already active.
    pub fn trigger_scan(self: &Arc<Self>) -> Result<bool> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }

        self.cancel.store(false, Ordering::SeqCst);
        self.discovery_done.store(false, Ordering::SeqCst);
        self.discovered.store(0, Ordering::SeqCst);
        self.hashed.store(0, Ordering::SeqCst);
        self.new_files.store(0, Ordering::SeqCst);
        self.scan_errors.store(0, Ordering::SeqCst);
        *self.scan_started_at.lock().unwrap() = Some(Utc::now());
        self.note_activity();

        let run_id = self.ctx.catalog.create_scan_run()?;
        *self.run_id.lock().unwrap() = Some(run_id);

        let supervisor = self.clone();
        std::thread::Builder::new()
            .name("discovery".into())
            .spawn(move || supervisor.discovery_thread())
            .expect("failed to spawn discovery");

        tracing::info!(run_id, "Scan triggered");
        Ok(true)
    }

    fn discovery_thread(self: Arc<Self>) {
        let stats = self.scanner.full_walk(&self.cancel, |event| match event {
            ScanEvent::Discovered {
                file,
                outcome,
                needs_work,
            } => {
                self.discovered.fetch_add(1, Ordering::SeqCst);
                if outcome.hashed {
                    self.hashed.fetch_add(1, Ordering::SeqCst);
                }
                if outcome.created {
                    self.new_files.fetch_add(1, Ordering::SeqCst);
                }
                *self.current_scan_file.lock().unwrap() = Some(file.rel_path.clone());
                if needs_work {
                    self.enqueue_discovered(&outcome.id);
                }
            }
            ScanEvent::Error { .. } => {
                self.scan_errors.fetch_add(1, Ordering::SeqCst);
            }
        });

        *self.current_scan_file.lock().unwrap() = None;
        self.discovery_done.store(true, Ordering::SeqCst);
        tracing::info!(
            discovered = stats.discovered,
            hashed = stats.hashed,
            new_files = stats.new_files,
            errors = stats.errors,
            cancelled = stats.cancelled,
            "Discovery finished"
        );
    }

    /// Request cancellation of the active scan. Workers observe the token
    /// between items; interrupted rows return to pending.
    pub fn stop_scan(&self) {
        if self.is_scanning() {
            tracing::info!("Scan stop requested");
            self.cancel.store(true, Ordering::SeqCst);
        }
    }

    /// Destructive reset of all derived state. Refused mid-scan.
    pub fn clear_index(&self) -> Result<bool> {
        if self.is_scanning() {
            return Ok(false);
        }
        for queue in &self.queues {
            queue.drain();
        }
        self.ctx.catalog.clear_index()?;
        self.ctx.artifacts.clear()?;
        self.ctx.dupes.write().unwrap().clear();
        self.ctx.clusters.write().unwrap().clear();
        self.total_discovered.store(0, Ordering::SeqCst);
        *self.started_at.lock().unwrap() = None;
        *self.completed_at.lock().unwrap() = None;
        tracing::warn!("Index cleared");
        Ok(true)
    }

    fn all_queues_idle(&self) -> bool {
        self.queues.iter().all(|queue| queue.is_idle())
    }

    /// Monitor loop: when the per-file stages settle after activity, run
    /// the batch phase (duplicates snapshot, person re-cluster, event
    /// detection) and close out the scan run.
    fn settle_loop(self: Arc<Self>) {
        while !self.shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_secs(2));

            if !self.settle_pending.load(Ordering::SeqCst) {
                continue;
            }
            if self.is_scanning() && !self.discovery_done.load(Ordering::SeqCst) {
                continue;
            }
            if !self.all_queues_idle() {
                continue;
            }
            // Idle debounce: require a second consecutive observation.
            std::thread::sleep(Duration::from_secs(2));
            if !self.all_queues_idle() {
                continue;
            }

            self.settle_pending.store(false, Ordering::SeqCst);
            self.run_batch_phase();
            self.close_run();

            *self.completed_at.lock().unwrap() = Some(Utc::now());
        }
    }

    /// Close out a settled scan run. The cancel token is scoped to the
    /// run that set it: once the run has drained, the token is released
    /// so watcher-fed work flows through the pipeline again.
    fn close_run(&self) {
        if !self.scanning.load(Ordering::SeqCst) {
            return;
        }

        let cancelled = self.cancel.load(Ordering::SeqCst);
        let run_id = self.run_id.lock().unwrap().take();
        if let Some(run_id) = run_id {
            let result = self.ctx.catalog.finish_scan_run(
                run_id,
                cancelled,
                self.discovered.load(Ordering::SeqCst),
                self.hashed.load(Ordering::SeqCst),
                self.new_files.load(Ordering::SeqCst),
                self.scan_errors.load(Ordering::SeqCst),
            );
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to close scan run");
            }
        }
        self.scanning.store(false, Ordering::SeqCst);
        self.cancel.store(false, Ordering::SeqCst);
        tracing::info!(cancelled, "Scan run finished");
    }

    /// The global barrier work: everything that needs the full per-file
    /// picture.
    fn run_batch_phase(&self) {
        tracing::info!("Pipeline settled, running batch phase");

        let groups = self.ctx.dupes.write().unwrap().groups();
        if let Err(e) = self.ctx.catalog.replace_duplicate_groups(&groups) {
            tracing::error!(error = %e, "Duplicate snapshot failed");
        }

        {
            let mut clusters = self.ctx.clusters.write().unwrap();
            match clustering::recluster(&self.ctx.catalog, &mut clusters) {
                Ok(created) if created > 0 => {
                    tracing::info!(created, "Person re-cluster complete");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Person re-cluster failed"),
            }
        }

        if let Err(e) = events::detect_events(&self.ctx.catalog) {
            tracing::error!(error = %e, "Event detection failed");
        }
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        let queues: BTreeMap<String, QueueSnapshot> = self
            .queues
            .iter()
            .map(|queue| {
                (
                    queue.stage.as_str().to_string(),
                    QueueSnapshot {
                        pending: queue.pending(),
                        in_flight: queue.in_flight(),
                        completed_total: queue.completed_total(),
                        failed_total: queue.failed_total(),
                        skipped_total: queue.skipped_total(),
                        current_file: queue.current(),
                    },
                )
            })
            .collect();

        let total_discovered = self.total_discovered.load(Ordering::SeqCst);
        let started_at = *self.started_at.lock().unwrap();
        let completed_at = *self.completed_at.lock().unwrap();
        let idle = self.all_queues_idle();

        let status = if total_discovered == 0 {
            "idle"
        } else if idle {
            "done"
        } else {
            "processing"
        };

        let uptime_seconds = match (started_at, completed_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds() as f64 / 1000.0,
            (Some(start), None) => (Utc::now() - start).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        };

        let total_completed = self.ctx.catalog.count_files_settled().unwrap_or(0);

        PipelineSnapshot {
            is_running: !self.shutdown.load(Ordering::SeqCst),
            status: status.to_string(),
            total_discovered,
            total_completed,
            started_at: started_at.map(|t| t.to_rfc3339()),
            completed_at: completed_at.map(|t| t.to_rfc3339()),
            uptime_seconds,
            bottleneck: stats::bottleneck(&queues, uptime_seconds),
            queues,
        }
    }

    pub fn scan_snapshot(&self) -> ScanSnapshot {
        let scanning = self.is_scanning();
        let phase = if scanning && !self.discovery_done.load(Ordering::SeqCst) {
            Some("discovery".to_string())
        } else if scanning {
            self.queues
                .iter()
                .find(|q| !q.is_idle())
                .map(|q| q.stage.as_str().to_string())
        } else {
            None
        };

        ScanSnapshot {
            is_scanning: scanning,
            cancel_requested: self.cancel.load(Ordering::SeqCst),
            discovered: self.discovered.load(Ordering::SeqCst),
            hashed: self.hashed.load(Ordering::SeqCst),
            new_files: self.new_files.load(Ordering::SeqCst),
            errors: self.scan_errors.load(Ordering::SeqCst),
            current_file: self.current_scan_file.lock().unwrap().clone(),
            started_at: self.scan_started_at.lock().unwrap().map(|t| t.to_rfc3339()),
            phase,
        }
    }

    /// Graceful stop for tests and shutdown paths.
    pub fn halt(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::config::Config;
    use crate::db::Catalog;
    use crate::dupes::DuplicateIndex;
    use crate::faces::{CentroidIndex, FaceDetector};
    use crate::ollama::OllamaClient;
    use crate::stages::geocode::Geocoder;
    use std::sync::RwLock;
    use tempfile::tempdir;

    fn test_supervisor(photos_dir: &std::path::Path, data_dir: &std::path::Path) -> Arc<Supervisor> {
        let config = Arc::new(Config {
            photos_path: photos_dir.to_path_buf(),
            data_dir: data_dir.to_path_buf(),
            ..Config::default()
        });
        let catalog = Arc::new(Catalog::open_in_memory().unwrap());
        let artifacts = Arc::new(ArtifactStore::new(&config).unwrap());
        let ctx = Arc::new(StageCtx {
            catalog: catalog.clone(),
            config: config.clone(),
            artifacts,
            geocoder: Arc::new(Geocoder::disabled()),
            ollama: Arc::new(OllamaClient::new("", "m")),
            detector: Arc::new(FaceDetector::new(config.models_dir())),
            dupes: Arc::new(RwLock::new(DuplicateIndex::new(6))),
            clusters: Arc::new(RwLock::new(CentroidIndex::new())),
            cancel: Arc::new(AtomicBool::new(false)),
        });
        let scanner = Arc::new(Scanner::new(catalog, config));
        Supervisor::new(ctx, scanner)
    }

    #[test]
    fn test_trigger_refuses_concurrent_scans() {
        let photos = tempdir().unwrap();
        let data = tempdir().unwrap();
        let supervisor = test_supervisor(photos.path(), data.path());

        assert!(supervisor.trigger_scan().unwrap());
        assert!(!supervisor.trigger_scan().unwrap(), "second trigger refused");
        supervisor.halt();
    }

    #[test]
    fn test_enqueue_fans_out_to_entry_stages() {
        let photos = tempdir().unwrap();
        let data = tempdir().unwrap();
        let supervisor = test_supervisor(photos.path(), data.path());

        supervisor.enqueue_discovered("aa");
        for stage in DISCOVERY_FANOUT {
            assert_eq!(supervisor.queue(*stage).pending(), 1);
        }
        assert_eq!(supervisor.queue(Stage::Geocode).pending(), 0);
        supervisor.halt();
    }

    #[test]
    fn test_snapshot_status_transitions() {
        let photos = tempdir().unwrap();
        let data = tempdir().unwrap();
        let supervisor = test_supervisor(photos.path(), data.path());

        assert_eq!(supervisor.snapshot().status, "idle");
        supervisor.enqueue_discovered("aa");
        assert_eq!(supervisor.snapshot().status, "processing");
        assert_eq!(supervisor.snapshot().total_discovered, 1);
        supervisor.halt();
    }

    #[test]
    fn test_clear_index_refused_while_scanning() {
        let photos = tempdir().unwrap();
        let data = tempdir().unwrap();
        let supervisor = test_supervisor(photos.path(), data.path());

        assert!(supervisor.trigger_scan().unwrap());
        assert!(!supervisor.clear_index().unwrap());
        supervisor.halt();
    }

    #[test]
    fn test_stop_scan_sets_cancel_token() {
        let photos = tempdir().unwrap();
        let data = tempdir().unwrap();
        let supervisor = test_supervisor(photos.path(), data.path());

        assert!(supervisor.trigger_scan().unwrap());
        supervisor.stop_scan();
        assert!(supervisor.cancel.load(Ordering::SeqCst));
        assert!(supervisor.scan_snapshot().cancel_requested);
        supervisor.halt();
    }

    #[test]
    fn test_cancel_token_released_when_run_closes() {
        let photos = tempdir().unwrap();
        let data = tempdir().unwrap();
        let supervisor = test_supervisor(photos.path(), data.path());

        assert!(supervisor.trigger_scan().unwrap());
        supervisor.stop_scan();
        assert!(supervisor.cancel.load(Ordering::SeqCst));

        // The cancelled run drains and settles; the token belongs to that
        // run and must not outlive it.
        supervisor.close_run();
        assert!(!supervisor.is_scanning());
        assert!(!supervisor.cancel.load(Ordering::SeqCst));
        assert!(!supervisor.scan_snapshot().cancel_requested);

        // Watcher-style work after the run flows into the queues again.
        supervisor.enqueue_discovered("aa");
        assert_eq!(supervisor.queue(Stage::Exif).pending(), 1);
        supervisor.halt();
    }

    #[test]
    fn test_close_run_without_active_scan_is_noop() {
        let photos = tempdir().unwrap();
        let data = tempdir().unwrap();
        let supervisor = test_supervisor(photos.path(), data.path());

        supervisor.close_run();
        assert!(!supervisor.is_scanning());
        supervisor.halt();
    }
}
