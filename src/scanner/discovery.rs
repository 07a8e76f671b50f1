//! Streaming enumeration of the photo root.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::Config;

/// A discovered file with the stat fields needed for the identity probe.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub abs_path: PathBuf,
    pub rel_path: String,
    pub size: u64,
    pub mtime: i64,
}

pub fn mime_for(path: &Path) -> Option<&'static str> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => Some("image/jpeg"),
        Some("png") => Some("image/png"),
        Some("webp") => Some("image/webp"),
        Some("heic") | Some("heif") => Some("image/heic"),
        Some("tiff") | Some("tif") => Some("image/tiff"),
        Some("bmp") => Some("image/bmp"),
        _ => None,
    }
}

pub fn stat_file(abs_path: &Path, photos_root: &Path) -> std::io::Result<DiscoveredFile> {
    let meta = std::fs::metadata(abs_path)?;
    let mtime = meta
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let rel_path = abs_path
        .strip_prefix(photos_root)
        .unwrap_or(abs_path)
        .to_string_lossy()
        .to_string();
    Ok(DiscoveredFile {
        abs_path: abs_path.to_path_buf(),
        rel_path,
        size: meta.len(),
        mtime,
    })
}

/// Walk the photo root, invoking `emit` for every supported file as it is
/// encountered. No batching: downstream consumers start before the walk
/// finishes. Returns false if `emit` asked to stop (cancellation).
pub fn walk_photos<F>(config: &Config, mut emit: F) -> bool
where
    F: FnMut(DiscoveredFile) -> bool,
{
    for entry in WalkDir::new(&config.photos_path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !config.is_supported_photo(path) {
            continue;
        }
        match stat_file(path, &config.photos_path) {
            Ok(found) => {
                if !emit(found) {
                    return false;
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not stat file");
            }
        }
    }
    true
}
