//! Stage result committers. Each one persists its rows and marks the
//! ledger `done` in a single transaction, and is idempotent: committing
//! equal content twice is a no-op, different content replaces.

use anyhow::Result;
use rusqlite::params;

use super::ledger::ledger_done_tx;
use super::Catalog;
use crate::pipeline::Stage;

#[derive(Debug, Clone, Default)]
pub struct ExifData {
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub lens_model: Option<String>,
    pub focal_length: Option<f64>,
    pub aperture: Option<f64>,
    pub shutter_speed: Option<String>,
    pub iso: Option<i64>,
    pub orientation: Option<i64>,
    pub taken_at: Option<String>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub gps_altitude: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ThumbMeta {
    pub size: u32,
    pub width: u32,
    pub height: u32,
    pub rel_path: String,
}

#[derive(Debug, Clone, Default)]
pub struct MotionResult {
    pub has_motion: bool,
    /// Sidecar Live Photo video, relative to the photo root.
    pub live_video: Option<String>,
    /// Extracted embedded video artifact, relative to the data root.
    pub motion_video: Option<String>,
}

impl Catalog {
    pub fn write_exif(&self, file_id: &str, data: &ExifData) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE files SET width = ?2, height = ?3, taken_at = ?4,
                 gps_latitude = ?5, gps_longitude = ?6
             WHERE id = ?1",
            params![
                file_id,
                data.width,
                data.height,
                data.taken_at,
                data.gps_latitude,
                data.gps_longitude
            ],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO exif
                 (file_id, camera_make, camera_model, lens_model, focal_length,
                  aperture, shutter_speed, iso, orientation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                file_id,
                data.camera_make,
                data.camera_model,
                data.lens_model,
                data.focal_length,
                data.aperture,
                data.shutter_speed,
                data.iso,
                data.orientation
            ],
        )?;
        ledger_done_tx(&tx, file_id, Stage::Exif)?;
        tx.commit()?;
        Ok(())
    }

    pub fn write_location(
        &self,
        file_id: &str,
        latitude: f64,
        longitude: f64,
        altitude: Option<f64>,
        country: &str,
        city: &str,
        address: &str,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO locations
                 (file_id, latitude, longitude, altitude, country, city, address)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![file_id, latitude, longitude, altitude, country, city, address],
        )?;
        ledger_done_tx(&tx, file_id, Stage::Geocode)?;
        tx.commit()?;
        Ok(())
    }

    pub fn write_thumbnails(&self, file_id: &str, thumbs: &[ThumbMeta]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for thumb in thumbs {
            tx.execute(
                "INSERT OR REPLACE INTO thumbnails (file_id, size, width, height, rel_path)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![file_id, thumb.size, thumb.width, thumb.height, thumb.rel_path],
            )?;
        }
        ledger_done_tx(&tx, file_id, Stage::Thumbs)?;
        tx.commit()?;
        Ok(())
    }

    /// Nearest stored thumbnail at or above the requested size.
    pub fn thumbnail_for(&self, file_id: &str, size: u32) -> Result<Option<ThumbMeta>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT size, width, height, rel_path FROM thumbnails
             WHERE file_id = ?1 ORDER BY size ASC",
        )?;
        let thumbs = stmt
            .query_map(params![file_id], |row| {
                Ok(ThumbMeta {
                    size: row.get(0)?,
                    width: row.get(1)?,
                    height: row.get(2)?,
                    rel_path: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let best = thumbs
            .iter()
            .find(|t| t.size >= size)
            .or_else(|| thumbs.last())
            .cloned();
        Ok(best)
    }

    pub fn write_phash(&self, file_id: &str, phash: u64, ahash: u64, dhash: u64) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO phashes (file_id, phash, ahash, dhash)
             VALUES (?1, ?2, ?3, ?4)",
            params![file_id, phash as i64, ahash as i64, dhash as i64],
        )?;
        ledger_done_tx(&tx, file_id, Stage::Phash)?;
        tx.commit()?;
        Ok(())
    }

    /// All stored perceptual hashes, for rebuilding the duplicate index.
    pub fn all_phashes(&self) -> Result<Vec<(String, u64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT file_id, phash FROM phashes")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn write_motion(&self, file_id: &str, result: &MotionResult) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE files SET has_motion = ?2, live_video = ?3, motion_video = ?4
             WHERE id = ?1",
            params![
                file_id,
                result.has_motion,
                result.live_video,
                result.motion_video
            ],
        )?;
        ledger_done_tx(&tx, file_id, Stage::Motion)?;
        tx.commit()?;
        Ok(())
    }

    pub fn write_caption(&self, file_id: &str, caption: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE files SET caption = ?2 WHERE id = ?1",
            params![file_id, caption],
        )?;
        ledger_done_tx(&tx, file_id, Stage::Caption)?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::seed_file;

    #[test]
    fn test_exif_commit_marks_ledger_done() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_file(&catalog, "aa", "a.jpg", 1, 0);

        let data = ExifData {
            camera_make: Some("Canon".into()),
            taken_at: Some("2024-07-01T10:00:00+00:00".into()),
            gps_latitude: Some(48.8566),
            gps_longitude: Some(2.3522),
            width: Some(4000),
            height: Some(3000),
            ..Default::default()
        };
        catalog.write_exif("aa", &data).unwrap();

        assert!(!catalog.stage_needed("aa", Stage::Exif).unwrap());
        let meta = catalog.get_file("aa").unwrap().unwrap();
        assert_eq!(meta.taken_at.as_deref(), Some("2024-07-01T10:00:00+00:00"));
        assert!((meta.gps_latitude.unwrap() - 48.8566).abs() < 1e-6);

        // Committing again with the same content is a no-op.
        catalog.write_exif("aa", &data).unwrap();
    }

    #[test]
    fn test_thumbnail_lookup_picks_nearest_size() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_file(&catalog, "aa", "a.jpg", 1, 0);
        let thumbs = [200u32, 600, 1200]
            .iter()
            .map(|s| ThumbMeta {
                size: *s,
                width: *s,
                height: *s / 2,
                rel_path: format!("thumbs/aa/aa_{s}.webp"),
            })
            .collect::<Vec<_>>();
        catalog.write_thumbnails("aa", &thumbs).unwrap();

        assert_eq!(catalog.thumbnail_for("aa", 600).unwrap().unwrap().size, 600);
        assert_eq!(catalog.thumbnail_for("aa", 601).unwrap().unwrap().size, 1200);
        assert_eq!(catalog.thumbnail_for("aa", 9999).unwrap().unwrap().size, 1200);
        assert_eq!(catalog.thumbnail_for("aa", 1).unwrap().unwrap().size, 200);
        assert!(catalog.thumbnail_for("bb", 200).unwrap().is_none());
    }

    #[test]
    fn test_phash_roundtrip_preserves_high_bit() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_file(&catalog, "aa", "a.jpg", 1, 0);
        let hash = 0xF000_0000_0000_0001u64;
        catalog.write_phash("aa", hash, 1, 2).unwrap();
        let stored = catalog.all_phashes().unwrap();
        assert_eq!(stored, vec![("aa".to_string(), hash)]);
    }
}
