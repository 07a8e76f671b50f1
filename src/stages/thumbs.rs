//! Thumbnail generation: full decode, EXIF orientation, multi-size WEBP.

use image::codecs::webp::WebPEncoder;
use image::DynamicImage;

use crate::db::ThumbMeta;
use crate::error::StageError;

use super::{StageCtx, StageOutcome};

pub const THUMB_SIZES: [u32; 3] = [200, 600, 1200];

pub fn run(ctx: &StageCtx, file_id: &str) -> Result<StageOutcome, StageError> {
    let (_, abs_path) = ctx.locate(file_id)?;

    // Orientation comes straight from the file header so this stage does
    // not depend on EXIF extraction having run first.
    let orientation = super::exif::extract(&abs_path).orientation.unwrap_or(1);

    let img = image::open(&abs_path)?;
    let img = apply_orientation(img, orientation);

    let mut metas = Vec::with_capacity(THUMB_SIZES.len());
    for size in THUMB_SIZES {
        let thumb = img.thumbnail(size, size);
        let mut encoded = Vec::new();
        // The WebP encoder only accepts 8-bit RGB(A) input.
        thumb
            .to_rgba8()
            .write_with_encoder(WebPEncoder::new_lossless(&mut encoded))
            .map_err(|e| StageError::PermanentDecode(e.to_string()))?;

        let path = ctx.artifacts.thumb_path(file_id, size);
        ctx.artifacts.write(&path, &encoded)?;
        metas.push(ThumbMeta {
            size,
            width: thumb.width(),
            height: thumb.height(),
            rel_path: ctx.artifacts.thumb_rel(file_id, size),
        });
    }

    ctx.catalog.write_thumbnails(file_id, &metas)?;
    Ok(StageOutcome::Done)
}

/// Apply an EXIF orientation (1-8) to decoded pixels.
pub fn apply_orientation(img: DynamicImage, orientation: i64) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
