//! Processing pipeline: stage graph, bounded queues, worker pools.
//!
//! The stage ordering is data, not code: `FLOW` is a static table mapping
//! each stage to its downstream stages, worker-pool size, retry budget and
//! algorithm version. Workers know nothing about each other; fan-out
//! follows the table.

pub mod queue;
pub mod stats;
pub mod supervisor;
pub mod worker;

pub use queue::StageQueue;
pub use supervisor::Supervisor;

/// One node in the processing graph. Discovery is a pseudo-stage (it
/// produces identifiers rather than consuming them) and event detection
/// runs as a batch when the pipeline settles, so neither appears here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Exif,
    Geocode,
    Thumbs,
    Motion,
    Phash,
    Faces,
    Caption,
    Tags,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Exif,
        Stage::Geocode,
        Stage::Thumbs,
        Stage::Motion,
        Stage::Phash,
        Stage::Faces,
        Stage::Caption,
        Stage::Tags,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Exif => "exif",
            Stage::Geocode => "geocoding",
            Stage::Thumbs => "thumbnails",
            Stage::Motion => "motion_photos",
            Stage::Phash => "hashing",
            Stage::Faces => "faces",
            Stage::Caption => "captioning",
            Stage::Tags => "tagging",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Stage::Exif => "EXIF",
            Stage::Geocode => "Geocoding",
            Stage::Thumbs => "Thumbnails",
            Stage::Motion => "Motion Photos",
            Stage::Phash => "Perceptual Hashing",
            Stage::Faces => "Face Detection",
            Stage::Caption => "Captioning",
            Stage::Tags => "Tagging",
        }
    }

    pub fn index(&self) -> usize {
        Stage::ALL.iter().position(|s| s == self).unwrap()
    }
}

/// Static description of a stage: concurrency, retry budget, downstream
/// fan-out and the version of its algorithm. Bumping `version` invalidates
/// every ledger row the previous version wrote.
pub struct StageSpec {
    pub stage: Stage,
    pub workers: usize,
    pub max_attempts: u32,
    pub version: i64,
    pub downstream: &'static [Stage],
}

/// The pipeline graph. I/O-bound stages get wider pools, pure-CPU stages
/// stay near core count, external-service stages run one worker behind a
/// shared rate limit.
pub const FLOW: &[StageSpec] = &[
    StageSpec {
        stage: Stage::Exif,
        workers: 4,
        max_attempts: 3,
        version: 1,
        downstream: &[Stage::Geocode],
    },
    StageSpec {
        stage: Stage::Geocode,
        workers: 2,
        max_attempts: 3,
        version: 1,
        downstream: &[],
    },
    StageSpec {
        stage: Stage::Thumbs,
        workers: 4,
        max_attempts: 3,
        version: 1,
        downstream: &[Stage::Faces, Stage::Caption, Stage::Tags],
    },
    StageSpec {
        stage: Stage::Motion,
        workers: 2,
        max_attempts: 3,
        version: 1,
        downstream: &[],
    },
    StageSpec {
        stage: Stage::Phash,
        workers: 2,
        max_attempts: 3,
        version: 1,
        downstream: &[],
    },
    StageSpec {
        stage: Stage::Faces,
        workers: 2,
        max_attempts: 3,
        version: 1,
        downstream: &[],
    },
    StageSpec {
        stage: Stage::Caption,
        workers: 1,
        max_attempts: 2,
        version: 1,
        downstream: &[],
    },
    StageSpec {
        stage: Stage::Tags,
        workers: 1,
        max_attempts: 2,
        version: 1,
        downstream: &[],
    },
];

/// Stages fed directly by discovery.
pub const DISCOVERY_FANOUT: &[Stage] = &[Stage::Exif, Stage::Thumbs, Stage::Motion, Stage::Phash];

/// Per-stage queue capacity. Producers block when full, which is what
/// bounds memory when discovery outruns the CPU stages.
pub const QUEUE_CAPACITY: usize = 1000;

pub fn spec(stage: Stage) -> &'static StageSpec {
    FLOW.iter()
        .find(|s| s.stage == stage)
        .expect("every stage has a spec")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_stage_has_a_spec() {
        for stage in Stage::ALL {
            assert_eq!(spec(stage).stage, stage);
        }
    }

    #[test]
    fn test_flow_is_acyclic() {
        // Walk downstream edges from every stage; the graph is tiny, so a
        // depth bound doubles as a cycle check.
        fn depth(stage: Stage, seen: usize) -> usize {
            assert!(seen < Stage::ALL.len(), "cycle in FLOW");
            spec(stage)
                .downstream
                .iter()
                .map(|d| depth(*d, seen + 1))
                .max()
                .unwrap_or(seen)
        }
        for stage in Stage::ALL {
            depth(stage, 0);
        }
    }

    #[test]
    fn test_discovery_reaches_every_stage() {
        let mut reached = std::collections::HashSet::new();
        let mut frontier: Vec<Stage> = DISCOVERY_FANOUT.to_vec();
        while let Some(stage) = frontier.pop() {
            if reached.insert(stage) {
                frontier.extend(spec(stage).downstream.iter().copied());
            }
        }
        assert_eq!(reached.len(), Stage::ALL.len());
    }
}
