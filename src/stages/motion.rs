//! Motion-photo handling: Apple Live Photo sidecars and Google Motion
//! Photos with an MP4 container embedded after the JPEG payload.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::db::MotionResult;
use crate::error::StageError;

use super::{StageCtx, StageOutcome};

/// Container brands that mark the start of embedded video data.
const MP4_SIGNATURES: [&[u8]; 4] = [b"ftypmp4", b"ftypisom", b"ftypmp42", b"ftypavc1"];

/// Only the trailing portion of the file is searched.
const TAIL_SEARCH_BYTES: u64 = 4 * 1024 * 1024;

pub fn run(ctx: &StageCtx, file_id: &str) -> Result<StageOutcome, StageError> {
    let (meta, abs_path) = ctx.locate(file_id)?;

    // Apple Live Photos ship the video as a same-basename sidecar.
    if let Some(sidecar) = find_live_sidecar(&abs_path) {
        let rel = Path::new(&meta.path)
            .with_extension(sidecar)
            .to_string_lossy()
            .to_string();
        ctx.catalog.write_motion(
            file_id,
            &MotionResult {
                has_motion: true,
                live_video: Some(rel),
                motion_video: None,
            },
        )?;
        return Ok(StageOutcome::Done);
    }

    // Embedded video only appears in JPEGs.
    let is_jpeg = matches!(
        abs_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref(),
        Some("jpg") | Some("jpeg")
    );
    if !is_jpeg {
        ctx.catalog.write_motion(file_id, &MotionResult::default())?;
        return Ok(StageOutcome::Done);
    }

    let tail = read_tail(&abs_path, TAIL_SEARCH_BYTES)?;
    match find_embedded_mp4(&tail) {
        Some(offset) => {
            let video = &tail[offset..];
            let artifact = ctx.artifacts.motion_path(file_id);
            ctx.artifacts.write(&artifact, video)?;
            ctx.catalog.write_motion(
                file_id,
                &MotionResult {
                    has_motion: true,
                    live_video: None,
                    motion_video: Some(ctx.artifacts.motion_rel(file_id)),
                },
            )?;
        }
        None => {
            ctx.catalog.write_motion(file_id, &MotionResult::default())?;
        }
    }
    Ok(StageOutcome::Done)
}

/// Same basename, `.mov`/`.MOV` extension, next to the photo.
/// Returns the matching extension when present.
pub fn find_live_sidecar(photo_path: &Path) -> Option<&'static str> {
    for ext in ["mov", "MOV"] {
        if photo_path.with_extension(ext).exists() {
            return Some(ext);
        }
    }
    None
}

fn read_tail(path: &Path, max_bytes: u64) -> std::io::Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    let take = len.min(max_bytes);
    file.seek(SeekFrom::End(-(take as i64)))?;
    let mut buffer = Vec::with_capacity(take as usize);
    file.read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// Locate the start of an embedded MP4 box in the buffer. The `ftyp`
/// marker sits 4 bytes into its box (after the 32-bit size), so the box
/// itself starts at `index - 4`.
pub fn find_embedded_mp4(data: &[u8]) -> Option<usize> {
    for signature in MP4_SIGNATURES {
        if let Some(index) = find_subslice(data, signature) {
            if index >= 4 && data.len() - (index - 4) >= 8 {
                return Some(index - 4);
            }
        }
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn motion_photo_bytes() -> Vec<u8> {
        // JPEG-ish prefix, then a minimal ftyp box.
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
        data.extend_from_slice(&[0u8; 64]);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x18]); // box size
        data.extend_from_slice(b"ftypmp42");
        data.extend_from_slice(&[0u8; 32]); // the "video"
        data
    }

    #[test]
    fn test_embedded_mp4_offset_points_at_box_start() {
        let data = motion_photo_bytes();
        let offset = find_embedded_mp4(&data).unwrap();
        assert_eq!(&data[offset + 4..offset + 8], b"ftyp");
        assert_eq!(offset, 68);
    }

    #[test]
    fn test_plain_jpeg_has_no_embedded_video() {
        let mut data = vec![0xFF, 0xD8];
        data.extend_from_slice(&[0u8; 512]);
        assert!(find_embedded_mp4(&data).is_none());
    }

    #[test]
    fn test_signature_without_room_for_box_is_rejected() {
        // Marker in the first 4 bytes cannot have a size prefix.
        let data = b"ftypmp42".to_vec();
        assert!(find_embedded_mp4(&data).is_none());
    }

    #[test]
    fn test_read_tail_bounded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.jpg");
        std::fs::write(&path, vec![7u8; 1000]).unwrap();
        let tail = read_tail(&path, 100).unwrap();
        assert_eq!(tail.len(), 100);
        let all = read_tail(&path, 10_000).unwrap();
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn test_live_sidecar_detection() {
        let dir = tempdir().unwrap();
        let photo = dir.path().join("IMG_0001.heic");
        std::fs::write(&photo, b"heic").unwrap();
        assert!(find_live_sidecar(&photo).is_none());

        std::fs::write(dir.path().join("IMG_0001.mov"), b"mov").unwrap();
        assert_eq!(find_live_sidecar(&photo), Some("mov"));
    }
}
