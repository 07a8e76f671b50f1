//! Serializable snapshot shapes for the status endpoints and WebSockets.

use serde::Serialize;
use std::collections::BTreeMap;

use super::{Stage, DISCOVERY_FANOUT, FLOW};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub in_flight: usize,
    pub completed_total: u64,
    pub failed_total: u64,
    pub skipped_total: u64,
    pub current_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PipelineSnapshot {
    pub is_running: bool,
    /// "idle" before any discovery, "processing" while busy, "done" after.
    pub status: String,
    pub total_discovered: u64,
    pub total_completed: u64,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub uptime_seconds: f64,
    /// Stage with the worst pending-to-throughput ratio, when any backlog
    /// exists.
    pub bottleneck: Option<String>,
    pub queues: BTreeMap<String, QueueSnapshot>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScanSnapshot {
    pub is_scanning: bool,
    pub cancel_requested: bool,
    pub discovered: u64,
    pub hashed: u64,
    pub new_files: u64,
    pub errors: u64,
    pub current_file: Option<String>,
    pub started_at: Option<String>,
    pub phase: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowNode {
    pub id: &'static str,
    pub name: &'static str,
    pub next: Vec<&'static str>,
}

/// The static stage graph, for the pipeline view in the UI.
pub fn flow_nodes() -> Vec<FlowNode> {
    let mut nodes = vec![FlowNode {
        id: "discovery",
        name: "Discovery",
        next: DISCOVERY_FANOUT.iter().map(|s| s.as_str()).collect(),
    }];
    nodes.extend(FLOW.iter().map(|s| FlowNode {
        id: s.stage.as_str(),
        name: s.stage.display_name(),
        next: s.downstream.iter().map(|d| d.as_str()).collect(),
    }));
    nodes.push(FlowNode {
        id: "events",
        name: "Event Detection",
        next: Vec::new(),
    });
    nodes
}

/// Pick the stage with the largest pending:throughput ratio. Throughput is
/// completions over uptime; a stage that has completed nothing yet ranks
/// by raw backlog.
pub fn bottleneck(queues: &BTreeMap<String, QueueSnapshot>, uptime_seconds: f64) -> Option<String> {
    let uptime = uptime_seconds.max(1.0);
    queues
        .iter()
        .filter(|(_, q)| q.pending > 0)
        .max_by(|(_, a), (_, b)| {
            let ratio = |q: &QueueSnapshot| {
                let throughput = (q.completed_total as f64 / uptime).max(1e-6);
                q.pending as f64 / throughput
            };
            ratio(a)
                .partial_cmp(&ratio(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(name, _)| name.clone())
}

/// Convenience for pre-sizing queue maps in tests and snapshots.
pub fn empty_queue_map() -> BTreeMap<String, QueueSnapshot> {
    Stage::ALL
        .iter()
        .map(|s| {
            (
                s.as_str().to_string(),
                QueueSnapshot {
                    pending: 0,
                    in_flight: 0,
                    completed_total: 0,
                    failed_total: 0,
                    skipped_total: 0,
                    current_file: None,
                },
            )
        })
        .collect()
}
