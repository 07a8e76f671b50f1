//! Stage bodies. Every stage conforms to the same contract: take a file
//! identifier, do its one declared operation, and commit results together
//! with the ledger mark through the catalog.

pub mod caption;
pub mod exif;
pub mod faces;
pub mod geocode;
pub mod motion;
pub mod phash;
pub mod tags;
pub mod thumbs;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use crate::artifacts::ArtifactStore;
use crate::config::Config;
use crate::db::{Catalog, FileMeta};
use crate::dupes::DuplicateIndex;
use crate::error::StageError;
use crate::faces::{CentroidIndex, FaceDetector};
use crate::ollama::OllamaClient;

/// How a stage body finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Results committed; the ledger row is already `done`.
    Done,
    /// Nothing to do for this file; the worker marks the row `skipped`.
    Skipped(&'static str),
}

/// Everything a stage body may touch. Built once by the supervisor and
/// shared across all worker pools.
pub struct StageCtx {
    pub catalog: Arc<Catalog>,
    pub config: Arc<Config>,
    pub artifacts: Arc<ArtifactStore>,
    pub geocoder: Arc<geocode::Geocoder>,
    pub ollama: Arc<OllamaClient>,
    pub detector: Arc<FaceDetector>,
    pub dupes: Arc<RwLock<DuplicateIndex>>,
    pub clusters: Arc<RwLock<CentroidIndex>>,
    pub cancel: Arc<AtomicBool>,
}

impl StageCtx {
    /// Resolve the file record and its absolute on-disk path. A vanished
    /// record is a missing precondition; a vanished file is transient
    /// (the reconcile pass will catch a true removal).
    pub fn locate(&self, file_id: &str) -> Result<(FileMeta, PathBuf), StageError> {
        let meta = self
            .catalog
            .get_file(file_id)?
            .ok_or(StageError::MissingPrecondition("file record not found"))?;
        let abs = self.config.photos_path.join(&meta.path);
        if !abs.exists() {
            return Err(StageError::TransientIo(format!(
                "file not on disk: {}",
                meta.path
            )));
        }
        Ok((meta, abs))
    }
}
