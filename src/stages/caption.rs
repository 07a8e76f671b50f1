//! AI captioning through the optional Ollama endpoint.

use crate::error::StageError;
use crate::ollama;

use super::{StageCtx, StageOutcome};

pub fn run(ctx: &StageCtx, file_id: &str) -> Result<StageOutcome, StageError> {
    if !ctx.ollama.enabled() {
        return Ok(StageOutcome::Skipped("captioning_disabled"));
    }
    if !ctx.ollama.available() {
        return Ok(StageOutcome::Skipped("endpoint_unreachable"));
    }

    let (_, abs_path) = ctx.locate(file_id)?;
    let orientation = super::exif::extract(&abs_path).orientation;
    let payload = ollama::prepare_image_base64(&abs_path, orientation)?;

    match ctx.ollama.caption(&payload) {
        Ok(Some(caption)) => {
            ctx.catalog.write_caption(file_id, &caption)?;
            Ok(StageOutcome::Done)
        }
        Ok(None) => Ok(StageOutcome::Skipped("empty_caption")),
        Err(StageError::ExternalDisabled) => Ok(StageOutcome::Skipped("endpoint_unreachable")),
        Err(e) => Err(e),
    }
}
