//! Bounded MPMC queue for one stage, plus its lifetime counters.
//!
//! Producers block while the queue is full; that blocking is the
//! backpressure that bounds memory when discovery outruns the slow
//! stages. Consumers poll with a timeout so they can observe shutdown
//! and cancellation between items.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use super::Stage;
use crate::db::FileId;

struct Inner {
    queue: VecDeque<FileId>,
    /// Identifiers currently queued, to avoid double-enqueueing the same
    /// file into one stage.
    queued: HashSet<FileId>,
}

pub struct StageQueue {
    pub stage: Stage,
    capacity: usize,
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
    in_flight: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    current_file: Mutex<Option<String>>,
}

impl StageQueue {
    pub fn new(stage: Stage, capacity: usize) -> Self {
        Self {
            stage,
            capacity,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                queued: HashSet::new(),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            in_flight: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            current_file: Mutex::new(None),
        }
    }

    /// Enqueue an identifier, blocking while the queue is full. Returns
    /// false if the id was already queued or `abort` was set while
    /// waiting for space.
    pub fn push(&self, id: &str, abort: &AtomicBool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.queued.contains(id) {
            return false;
        }
        while inner.queue.len() >= self.capacity {
            if abort.load(Ordering::SeqCst) {
                return false;
            }
            let (guard, _timeout) = self
                .not_full
                .wait_timeout(inner, Duration::from_millis(200))
                .unwrap();
            inner = guard;
        }
        inner.queued.insert(id.to_string());
        inner.queue.push_back(id.to_string());
        drop(inner);
        self.not_empty.notify_one();
        true
    }

    /// Dequeue with a timeout. A successful pop counts as in-flight until
    /// the worker reports back through one of the `note_*` methods.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<FileId> {
        let mut inner = self.inner.lock().unwrap();
        if inner.queue.is_empty() {
            let (guard, _timeout) = self.not_empty.wait_timeout(inner, timeout).unwrap();
            inner = guard;
        }
        let id = inner.queue.pop_front()?;
        inner.queued.remove(&id);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        drop(inner);
        self.not_full.notify_one();
        Some(id)
    }

    pub fn note_completed(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn note_failed(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn note_skipped(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    /// The item was neither processed nor counted (dropped on cancel, or
    /// re-queued for retry).
    pub fn note_released(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn set_current(&self, path: Option<String>) {
        *self.current_file.lock().unwrap() = path;
    }

    pub fn current(&self) -> Option<String> {
        self.current_file.lock().unwrap().clone()
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn completed_total(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed_total(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0 && self.in_flight() == 0
    }

    /// Drop all queued items. Used by clear-index.
    pub fn drain(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.clear();
        inner.queued.clear();
        drop(inner);
        self.not_full.notify_all();
    }
}
