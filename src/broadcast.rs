//! Progress broadcasting: snapshots fan out to every connected WebSocket
//! through a tokio broadcast channel. A ticker thread coalesces pipeline
//! churn to at most one frame per 250 ms, and only on change.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::pipeline::stats::{PipelineSnapshot, ScanSnapshot};
use crate::pipeline::Supervisor;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressFrame {
    pub scan: ScanSnapshot,
    pub pipeline: PipelineSnapshot,
}

#[derive(Clone)]
pub struct ProgressBroadcaster {
    tx: broadcast::Sender<ProgressFrame>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        // Slow consumers lag and resume on the next frame; nothing blocks.
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressFrame> {
        self.tx.subscribe()
    }

    pub fn publish(&self, frame: ProgressFrame) {
        // No receivers is fine; frames are recomputed, never queued up.
        let _ = self.tx.send(frame);
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Coalescing ticker: compose a frame every 250 ms, publish when it
/// differs from the previous one.
pub fn spawn_ticker(
    supervisor: Arc<Supervisor>,
    broadcaster: ProgressBroadcaster,
    shutdown: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("progress-ticker".into())
        .spawn(move || {
            let mut last: Option<ProgressFrame> = None;
            while !shutdown.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(250));
                let frame = ProgressFrame {
                    scan: supervisor.scan_snapshot(),
                    pipeline: supervisor.snapshot(),
                };
                if last.as_ref() != Some(&frame) {
                    broadcaster.publish(frame.clone());
                    last = Some(frame);
                }
            }
        })
        .expect("failed to spawn progress ticker")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stats::empty_queue_map;

    fn frame(discovered: u64) -> ProgressFrame {
        ProgressFrame {
            scan: ScanSnapshot {
                is_scanning: false,
                cancel_requested: false,
                discovered,
                hashed: 0,
                new_files: 0,
                errors: 0,
                current_file: None,
                started_at: None,
                phase: None,
            },
            pipeline: PipelineSnapshot {
                is_running: true,
                status: "idle".into(),
                total_discovered: discovered,
                total_completed: 0,
                started_at: None,
                completed_at: None,
                uptime_seconds: 0.0,
                bottleneck: None,
                queues: empty_queue_map(),
            },
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_published_frames() {
        let broadcaster = ProgressBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        broadcaster.publish(frame(3));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.scan.discovered, 3);
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let broadcaster = ProgressBroadcaster::new();
        broadcaster.publish(frame(1));
    }

    #[test]
    fn test_frames_compare_for_coalescing() {
        assert_eq!(frame(1), frame(1));
        assert_ne!(frame(1), frame(2));
    }
}
