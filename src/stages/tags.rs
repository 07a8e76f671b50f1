//! AI tagging: the same vision endpoint as captioning, with a
//! classification prompt. Same optional semantics.

use crate::error::StageError;
use crate::ollama;

use super::{StageCtx, StageOutcome};

pub fn run(ctx: &StageCtx, file_id: &str) -> Result<StageOutcome, StageError> {
    if !ctx.ollama.enabled() {
        return Ok(StageOutcome::Skipped("tagging_disabled"));
    }
    if !ctx.ollama.available() {
        return Ok(StageOutcome::Skipped("endpoint_unreachable"));
    }

    let (_, abs_path) = ctx.locate(file_id)?;
    let orientation = super::exif::extract(&abs_path).orientation;
    let payload = ollama::prepare_image_base64(&abs_path, orientation)?;

    match ctx.ollama.tags(&payload) {
        Ok(labels) if labels.is_empty() => Ok(StageOutcome::Skipped("no_tags")),
        Ok(labels) => {
            ctx.catalog.write_tags(file_id, &labels)?;
            Ok(StageOutcome::Done)
        }
        Err(StageError::ExternalDisabled) => Ok(StageOutcome::Skipped("endpoint_unreachable")),
        Err(e) => Err(e),
    }
}
