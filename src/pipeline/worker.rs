//! The uniform stage worker: dequeue, consult the ledger, run the stage
//! body, commit, fan out. One pool of these per stage.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::db::{Disposition, StageStatus};
use crate::error::StageError;
use crate::stages::{self, StageCtx, StageOutcome};

use super::supervisor::Supervisor;
use super::{Stage, StageSpec, FLOW};

pub(super) fn spawn_pools(supervisor: &Arc<Supervisor>) {
    for spec in FLOW {
        for worker_id in 0..spec.workers {
            let supervisor = supervisor.clone();
            std::thread::Builder::new()
                .name(format!("{}-{}", spec.stage.as_str(), worker_id))
                .spawn(move || worker_loop(supervisor, spec))
                .expect("failed to spawn stage worker");
        }
    }
}

fn worker_loop(supervisor: Arc<Supervisor>, spec: &'static StageSpec) {
    let queue = supervisor.queue(spec.stage);
    tracing::debug!(stage = spec.stage.as_str(), "Worker started");

    while !supervisor.shutdown.load(Ordering::SeqCst) {
        let Some(file_id) = queue.pop_timeout(Duration::from_millis(500)) else {
            continue;
        };

        // Between-items cancellation point: the cancelled run's queued
        // work is dropped untouched so the next run resumes it via the
        // ledger. The supervisor releases the token once the run drains.
        if supervisor.cancel.load(Ordering::SeqCst) {
            tracing::debug!(
                stage = spec.stage.as_str(),
                file_id,
                "Dropping queued item from cancelled run"
            );
            queue.note_released();
            continue;
        }

        // A panicking stage must not take the worker thread down.
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            process_item(&supervisor, spec, &file_id)
        }));
        if outcome.is_err() {
            tracing::error!(
                stage = spec.stage.as_str(),
                file_id,
                "Stage panicked (recovered)"
            );
            queue.note_released();
            queue.set_current(None);
        }
    }

    tracing::debug!(stage = spec.stage.as_str(), "Worker stopped");
}

fn process_item(supervisor: &Arc<Supervisor>, spec: &'static StageSpec, file_id: &str) {
    let stage = spec.stage;
    let queue = supervisor.queue(stage);
    let ctx = supervisor.ctx();

    match ctx.catalog.stage_disposition(file_id, stage) {
        Err(e) => {
            tracing::error!(stage = stage.as_str(), file_id, error = %e, "Ledger read failed");
            queue.note_released();
        }
        Ok(Disposition::InFlight) => {
            // Another worker owns it; it will fan out on completion.
            queue.note_released();
        }
        Ok(Disposition::FastForward) => {
            queue.note_released();
            supervisor.fan_out(spec.downstream, file_id);
        }
        Ok(Disposition::Run) => {
            run_item(supervisor, spec, file_id);
        }
    }
}

fn run_item(supervisor: &Arc<Supervisor>, spec: &'static StageSpec, file_id: &str) {
    let stage = spec.stage;
    let queue = supervisor.queue(stage);
    let ctx = supervisor.ctx();

    if let Err(e) = ctx
        .catalog
        .mark_stage(file_id, stage, StageStatus::InFlight, None)
    {
        tracing::error!(stage = stage.as_str(), file_id, error = %e, "Ledger write failed");
        queue.note_released();
        return;
    }

    let display_path = ctx
        .catalog
        .get_file(file_id)
        .ok()
        .flatten()
        .map(|meta| meta.path);
    queue.set_current(display_path);

    let result = run_stage(&ctx, stage, file_id);
    queue.set_current(None);

    match result {
        Ok(StageOutcome::Done) => {
            // The committer already marked the ledger inside its
            // transaction.
            queue.note_completed();
            supervisor.fan_out(spec.downstream, file_id);
        }
        Ok(StageOutcome::Skipped(reason)) => {
            let marked = ctx.catalog.mark_stage(
                file_id,
                stage,
                StageStatus::Skipped,
                Some(("skipped", reason)),
            );
            if let Err(e) = marked {
                tracing::error!(stage = stage.as_str(), file_id, error = %e, "Ledger write failed");
            }
            queue.note_skipped();
            supervisor.fan_out(spec.downstream, file_id);
        }
        Err(StageError::Cancelled) => {
            // Leave the work resumable: the row goes back to pending.
            let _ = ctx
                .catalog
                .mark_stage(file_id, stage, StageStatus::Pending, None);
            queue.note_released();
        }
        Err(err @ StageError::TransientIo(_)) => {
            retry_or_fail(supervisor, spec, file_id, &err);
        }
        Err(err @ StageError::PermanentDecode(_))
        | Err(err @ StageError::MissingPrecondition(_))
        | Err(err @ StageError::ExternalDisabled) => {
            // Deterministic: skip and let dependents proceed.
            let message = err.to_string();
            let _ = ctx.catalog.mark_stage(
                file_id,
                stage,
                StageStatus::Skipped,
                Some((err.code(), &message)),
            );
            queue.note_skipped();
            supervisor.fan_out(spec.downstream, file_id);
        }
        Err(err @ StageError::Fatal(_)) => {
            let message = err.to_string();
            tracing::error!(stage = stage.as_str(), file_id, error = %message, "Stage failed");
            let _ = ctx.catalog.mark_stage(
                file_id,
                stage,
                StageStatus::Failed,
                Some((err.code(), &message)),
            );
            queue.note_failed();
        }
    }
}

/// Transient error policy: capped exponential backoff, re-queue while
/// attempts remain, otherwise leave the row failed.
fn retry_or_fail(
    supervisor: &Arc<Supervisor>,
    spec: &'static StageSpec,
    file_id: &str,
    err: &StageError,
) {
    let stage = spec.stage;
    let queue = supervisor.queue(stage);
    let ctx = supervisor.ctx();
    let message = err.to_string();

    let attempts = match ctx
        .catalog
        .record_attempt(file_id, stage, err.code(), &message)
    {
        Ok(n) => n,
        Err(e) => {
            tracing::error!(stage = stage.as_str(), file_id, error = %e, "Ledger write failed");
            queue.note_released();
            return;
        }
    };

    if attempts >= spec.max_attempts {
        tracing::warn!(
            stage = stage.as_str(),
            file_id,
            attempts,
            error = %message,
            "Giving up after transient errors"
        );
        queue.note_failed();
        return;
    }

    backoff_sleep(supervisor, attempts);
    queue.note_released();
    if !supervisor.cancel.load(Ordering::SeqCst) {
        queue.push(file_id, &supervisor.cancel);
    }
}

fn backoff_sleep(supervisor: &Arc<Supervisor>, attempts: u32) {
    let backoff = Duration::from_millis(500)
        .saturating_mul(1 << attempts.min(5))
        .min(Duration::from_secs(10));
    let deadline = std::time::Instant::now() + backoff;
    while std::time::Instant::now() < deadline {
        if supervisor.shutdown.load(Ordering::SeqCst) || supervisor.cancel.load(Ordering::SeqCst) {
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

fn run_stage(ctx: &Arc<StageCtx>, stage: Stage, file_id: &str) -> Result<StageOutcome, StageError> {
    // Final cancellation check before any expensive operation.
    if ctx.cancel.load(Ordering::SeqCst) {
        return Err(StageError::Cancelled);
    }
    match stage {
        Stage::Exif => stages::exif::run(ctx, file_id),
        Stage::Geocode => stages::geocode::run(ctx, file_id),
        Stage::Thumbs => stages::thumbs::run(ctx, file_id),
        Stage::Motion => stages::motion::run(ctx, file_id),
        Stage::Phash => stages::phash::run(ctx, file_id),
        Stage::Faces => stages::faces::run(ctx, file_id),
        Stage::Caption => stages::caption::run(ctx, file_id),
        Stage::Tags => stages::tags::run(ctx, file_id),
    }
}
