//! Content-addressed storage for derived blobs.
//!
//! Artifact filenames are pure functions of the file identifier plus the
//! artifact kind and parameters, so re-running a stage lands on the same
//! path and concurrent writers can never collide across files. Paths are
//! sharded by the first two hex characters of the identifier to keep
//! directory sizes sane.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;

pub struct ArtifactStore {
    thumbs_dir: PathBuf,
    faces_dir: PathBuf,
    motion_dir: PathBuf,
}

fn shard(file_id: &str) -> &str {
    &file_id[..file_id.len().min(2)]
}

impl ArtifactStore {
    pub fn new(config: &Config) -> Result<Self> {
        let store = Self {
            thumbs_dir: config.thumbs_dir(),
            faces_dir: config.faces_dir(),
            motion_dir: config.motion_dir(),
        };
        store.ensure_dirs()?;
        Ok(store)
    }

    fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.thumbs_dir)?;
        fs::create_dir_all(&self.faces_dir)?;
        fs::create_dir_all(&self.motion_dir)?;
        Ok(())
    }

    pub fn thumb_path(&self, file_id: &str, size: u32) -> PathBuf {
        self.thumbs_dir
            .join(shard(file_id))
            .join(format!("{file_id}_{size}.webp"))
    }

    /// Thumbnail path relative to the data root, as stored in the catalog.
    pub fn thumb_rel(&self, file_id: &str, size: u32) -> String {
        format!("thumbs/{}/{file_id}_{size}.webp", shard(file_id))
    }

    pub fn face_path(&self, file_id: &str, face_index: usize) -> PathBuf {
        self.faces_dir
            .join(shard(file_id))
            .join(format!("{file_id}_face{face_index}.webp"))
    }

    pub fn face_rel(&self, file_id: &str, face_index: usize) -> String {
        format!("faces/{}/{file_id}_face{face_index}.webp", shard(file_id))
    }

    pub fn motion_path(&self, file_id: &str) -> PathBuf {
        self.motion_dir
            .join(shard(file_id))
            .join(format!("{file_id}.mp4"))
    }

    pub fn motion_rel(&self, file_id: &str) -> String {
        format!("motion_videos/{}/{file_id}.mp4", shard(file_id))
    }

    /// Write bytes to an artifact path. Goes through a sibling temp file
    /// and a rename so readers never observe a half-written artifact.
    pub fn write(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("part");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Remove every derived blob. Used by clear-index.
    pub fn clear(&self) -> Result<()> {
        for dir in [&self.thumbs_dir, &self.faces_dir, &self.motion_dir] {
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
        }
        self.ensure_dirs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let store = ArtifactStore::new(&config).unwrap();
        (dir, store)
    }

    #[test]
    fn test_paths_are_deterministic_and_sharded() {
        let (_dir, store) = store();
        let id = "ab12cd34";
        let p1 = store.thumb_path(id, 600);
        let p2 = store.thumb_path(id, 600);
        assert_eq!(p1, p2);
        assert!(p1.to_string_lossy().contains("/ab/"));
        assert!(p1.to_string_lossy().ends_with("ab12cd34_600.webp"));
        assert_eq!(store.thumb_rel(id, 200), "thumbs/ab/ab12cd34_200.webp");
        assert_eq!(store.face_rel(id, 1), "faces/ab/ab12cd34_face1.webp");
        assert_eq!(store.motion_rel(id), "motion_videos/ab/ab12cd34.mp4");
    }

    #[test]
    fn test_write_then_overwrite() {
        let (_dir, store) = store();
        let path = store.thumb_path("ff00", 200);
        store.write(&path, b"one").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"one");
        store.write(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!path.with_extension("part").exists());
    }

    #[test]
    fn test_clear_recreates_empty_dirs() {
        let (_dir, store) = store();
        let path = store.face_path("aa11", 0);
        store.write(&path, b"crop").unwrap();
        store.clear().unwrap();
        assert!(!path.exists());
        assert!(store.thumbs_dir.exists());
    }
}
