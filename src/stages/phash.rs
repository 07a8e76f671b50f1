//! Perceptual hashing: pHash, aHash and dHash as 64-bit fingerprints,
//! feeding the duplicate union-find.

use img_hash::{HashAlg, HasherConfig};

use crate::error::StageError;

use super::{StageCtx, StageOutcome};

pub struct PerceptualHashes {
    pub phash: u64,
    pub ahash: u64,
    pub dhash: u64,
}

pub fn run(ctx: &StageCtx, file_id: &str) -> Result<StageOutcome, StageError> {
    let (_, abs_path) = ctx.locate(file_id)?;

    // Decode through img_hash's re-exported image crate so hasher and
    // pixels agree on the image type.
    let img = img_hash::image::open(&abs_path)
        .map_err(|e| StageError::PermanentDecode(e.to_string()))?;

    let hashes = compute(&img);
    ctx.catalog
        .write_phash(file_id, hashes.phash, hashes.ahash, hashes.dhash)?;

    let unions = {
        let mut dupes = ctx.dupes.write().unwrap();
        dupes.insert(file_id, hashes.phash)
    };
    if unions > 0 {
        tracing::debug!(file_id, unions, "Near-duplicate match");
    }

    Ok(StageOutcome::Done)
}

pub fn compute(img: &img_hash::image::DynamicImage) -> PerceptualHashes {
    // 8x8 = 64 bits for each fingerprint. The DCT preprocessing on a mean
    // hash is the classic pHash; plain mean is aHash; gradient is dHash.
    let phasher = HasherConfig::new()
        .hash_size(8, 8)
        .hash_alg(HashAlg::Mean)
        .preproc_dct()
        .to_hasher();
    let ahasher = HasherConfig::new()
        .hash_size(8, 8)
        .hash_alg(HashAlg::Mean)
        .to_hasher();
    let dhasher = HasherConfig::new()
        .hash_size(8, 8)
        .hash_alg(HashAlg::Gradient)
        .to_hasher();

    PerceptualHashes {
        phash: hash_to_u64(phasher.hash_image(img).as_bytes()),
        ahash: hash_to_u64(ahasher.hash_image(img).as_bytes()),
        dhash: hash_to_u64(dhasher.hash_image(img).as_bytes()),
    }
}

fn hash_to_u64(bytes: &[u8]) -> u64 {
    let mut out = [0u8; 8];
    for (slot, byte) in out.iter_mut().zip(bytes.iter()) {
        *slot = *byte;
    }
    u64::from_be_bytes(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dupes::hamming;
    use img_hash::image::{DynamicImage, Rgb, RgbImage};

    /// A small synthetic scene with structure, so gradient hashes are
    /// nondegenerate.
    fn scene(width: u32, height: u32) -> DynamicImage {
        let mut img = RgbImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let r = (255 * x / width.max(1)) as u8;
                let g = (255 * y / height.max(1)) as u8;
                let b = if (x / 8 + y / 8) % 2 == 0 { 200 } else { 40 };
                img.put_pixel(x, y, Rgb([r, g, b]));
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_hash_is_deterministic() {
        let img = scene(64, 48);
        let a = compute(&img);
        let b = compute(&img);
        assert_eq!(a.phash, b.phash);
        assert_eq!(a.ahash, b.ahash);
        assert_eq!(a.dhash, b.dhash);
    }

    #[test]
    fn test_resized_copy_is_hamming_close() {
        let original = scene(256, 192);
        let resized = original.thumbnail(96, 72);
        let a = compute(&original);
        let b = compute(&resized);
        assert!(
            hamming(a.phash, b.phash) <= 6,
            "resized copy drifted {} bits",
            hamming(a.phash, b.phash)
        );
    }

    #[test]
    fn test_different_scenes_are_distant() {
        let a = compute(&scene(128, 96));
        // An inverted-gradient scene.
        let mut img = RgbImage::new(128, 96);
        for y in 0..96 {
            for x in 0..128 {
                let v = if x % 3 == 0 { 255 } else { 0 };
                img.put_pixel(x, y, Rgb([v, 255 - v, v]));
            }
        }
        let b = compute(&DynamicImage::ImageRgb8(img));
        assert!(hamming(a.phash, b.phash) > 6);
    }

    #[test]
    fn test_hash_to_u64_padding() {
        assert_eq!(hash_to_u64(&[0xFF]), 0xFF00_0000_0000_0000);
        assert_eq!(hash_to_u64(&[1, 2, 3, 4, 5, 6, 7, 8]), 0x0102_0304_0506_0708);
    }
}
