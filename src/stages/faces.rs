//! Face detection stage: detect, crop, embed, store, and assign each face
//! to a person cluster incrementally.

use image::codecs::webp::WebPEncoder;

use crate::db::NewFace;
use crate::error::StageError;
use crate::faces::clustering::{self, Assignment};
use crate::faces::detector::crop_face;

use super::{StageCtx, StageOutcome};

/// Longest edge of stored face crops.
const FACE_CROP_SIZE: u32 = 150;

pub fn run(ctx: &StageCtx, file_id: &str) -> Result<StageOutcome, StageError> {
    let (_, abs_path) = ctx.locate(file_id)?;

    let orientation = super::exif::extract(&abs_path).orientation.unwrap_or(1);
    let img = image::open(&abs_path)?;
    let img = super::thumbs::apply_orientation(img, orientation);

    let detected = match ctx.detector.detect(&img) {
        Ok(found) => found,
        Err(e) => {
            // Models unavailable (offline, bad download): optional stage,
            // do not block the pipeline.
            tracing::warn!(error = %e, "Face detector unavailable");
            return Ok(StageOutcome::Skipped("detector_unavailable"));
        }
    };

    let mut new_faces = Vec::with_capacity(detected.len());
    for (index, face) in detected.iter().enumerate() {
        let crop = crop_face(&img, &face.bbox, img.width(), img.height());
        let crop = crop.thumbnail(FACE_CROP_SIZE, FACE_CROP_SIZE);
        let mut encoded = Vec::new();
        crop.to_rgba8()
            .write_with_encoder(WebPEncoder::new_lossless(&mut encoded))
            .map_err(|e| StageError::PermanentDecode(e.to_string()))?;
        let path = ctx.artifacts.face_path(file_id, index);
        ctx.artifacts.write(&path, &encoded)?;

        new_faces.push(NewFace {
            bbox: (face.bbox.x, face.bbox.y, face.bbox.width, face.bbox.height),
            embedding: face.embedding.clone(),
            confidence: Some(face.confidence as f64),
            crop_path: Some(ctx.artifacts.face_rel(file_id, index)),
        });
    }

    let face_ids = ctx.catalog.write_faces(file_id, &new_faces)?;
    if !face_ids.is_empty() {
        tracing::debug!(file_id, faces = face_ids.len(), "Detected faces");
    }

    // Incremental person assignment; a full re-cluster runs at cadence.
    let recluster_due;
    {
        let mut clusters = ctx.clusters.write().unwrap();
        for (face_id, face) in face_ids.iter().zip(new_faces.iter()) {
            let person_id = match clusters.assign(&face.embedding) {
                Assignment::Existing(person_id) => person_id,
                Assignment::NewPerson => ctx.catalog.create_person(Some(*face_id))?,
            };
            ctx.catalog.assign_face_person(*face_id, person_id)?;
            clusters.add_member(person_id, &face.embedding);
        }
        recluster_due = clusters.recluster_due();
    }

    if recluster_due {
        let mut clusters = ctx.clusters.write().unwrap();
        let created = clustering::recluster(&ctx.catalog, &mut clusters)?;
        tracing::info!(created, "Periodic face re-cluster");
    }

    Ok(StageOutcome::Done)
}
