//! Read-API query surface: filtered pagination, browse groupings, search
//! and library statistics. Everything here is read-only.

use anyhow::Result;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter};
use serde::{Deserialize, Serialize};

use super::files::{file_from_row, FILE_COLUMNS};
use super::{Catalog, FileMeta};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhotoFilter {
    pub directory: Option<String>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub person_id: Option<i64>,
    pub event_id: Option<i64>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub favorite: Option<bool>,
    pub min_size: Option<i64>,
    pub duplicate_group: Option<i64>,
    pub q: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhotoPage {
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
    pub photos: Vec<FileMeta>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryCount {
    pub directory: String,
    pub photo_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineBucket {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub photo_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaceCount {
    pub country: Option<String>,
    pub city: Option<String>,
    pub photo_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapPoint {
    pub file_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LibraryStats {
    pub photos: i64,
    pub favorites: i64,
    pub total_bytes: i64,
    pub with_gps: i64,
    pub faces: i64,
    pub persons: i64,
    pub events: i64,
    pub tags: i64,
    pub duplicate_groups: i64,
}

fn push_filter_clauses(
    filter: &PhotoFilter,
    clauses: &mut Vec<String>,
    values: &mut Vec<Value>,
) {
    clauses.push("files.missing_since IS NULL".into());

    if let Some(directory) = &filter.directory {
        clauses.push(format!("files.directory = ?{}", values.len() + 1));
        values.push(Value::Text(directory.clone()));
    }
    if let Some(year) = filter.year {
        clauses.push(format!(
            "CAST(strftime('%Y', files.taken_at) AS INTEGER) = ?{}",
            values.len() + 1
        ));
        values.push(Value::Integer(year as i64));
    }
    if let Some(month) = filter.month {
        clauses.push(format!(
            "CAST(strftime('%m', files.taken_at) AS INTEGER) = ?{}",
            values.len() + 1
        ));
        values.push(Value::Integer(month as i64));
    }
    if let Some(person_id) = filter.person_id {
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM faces WHERE faces.file_id = files.id AND faces.person_id = ?{})",
            values.len() + 1
        ));
        values.push(Value::Integer(person_id));
    }
    if let Some(event_id) = filter.event_id {
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM event_files WHERE event_files.file_id = files.id \
             AND event_files.event_id = ?{})",
            values.len() + 1
        ));
        values.push(Value::Integer(event_id));
    }
    if let Some(country) = &filter.country {
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM locations WHERE locations.file_id = files.id \
             AND locations.country = ?{})",
            values.len() + 1
        ));
        values.push(Value::Text(country.clone()));
    }
    if let Some(city) = &filter.city {
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM locations WHERE locations.file_id = files.id \
             AND locations.city = ?{})",
            values.len() + 1
        ));
        values.push(Value::Text(city.clone()));
    }
    if let Some(favorite) = filter.favorite {
        clauses.push(format!("files.is_favorite = ?{}", values.len() + 1));
        values.push(Value::Integer(favorite as i64));
    }
    if let Some(min_size) = filter.min_size {
        clauses.push(format!("files.size_bytes >= ?{}", values.len() + 1));
        values.push(Value::Integer(min_size));
    }
    if let Some(group) = filter.duplicate_group {
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM duplicate_members WHERE duplicate_members.file_id = files.id \
             AND duplicate_members.group_id = ?{})",
            values.len() + 1
        ));
        values.push(Value::Integer(group));
    }
    if let Some(q) = &filter.q {
        let like = format!("%{}%", q.trim());
        let base = values.len();
        clauses.push(format!(
            "(files.path LIKE ?{p1} OR files.file_name LIKE ?{p1} \
             OR files.caption LIKE ?{p1} \
             OR EXISTS (SELECT 1 FROM locations l WHERE l.file_id = files.id \
                 AND (l.city LIKE ?{p1} OR l.country LIKE ?{p1} OR l.address LIKE ?{p1})) \
             OR EXISTS (SELECT 1 FROM file_tags ft JOIN tags t ON t.id = ft.tag_id \
                 WHERE ft.file_id = files.id AND t.name LIKE ?{p1}) \
             OR EXISTS (SELECT 1 FROM faces fc JOIN persons p ON p.id = fc.person_id \
                 WHERE fc.file_id = files.id AND p.name LIKE ?{p1}))",
            p1 = base + 1
        ));
        values.push(Value::Text(like));
    }
}

impl Catalog {
    pub fn list_photos(&self, filter: &PhotoFilter) -> Result<PhotoPage> {
        let limit = filter.limit.unwrap_or(100).min(500);
        let offset = filter.offset.unwrap_or(0);

        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        push_filter_clauses(filter, &mut clauses, &mut values);
        let where_sql = clauses.join(" AND ");

        let conn = self.conn();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM files WHERE {where_sql}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE {where_sql}
             ORDER BY files.taken_at DESC, files.path
             LIMIT ?{} OFFSET ?{}",
            values.len() + 1,
            values.len() + 2
        );
        values.push(Value::Integer(limit as i64));
        values.push(Value::Integer(offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let photos = stmt
            .query_map(params_from_iter(values.iter()), file_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(PhotoPage {
            total,
            limit,
            offset,
            photos,
        })
    }

    pub fn directories(&self) -> Result<Vec<DirectoryCount>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT directory, COUNT(*) FROM files
             WHERE missing_since IS NULL
             GROUP BY directory ORDER BY directory",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DirectoryCount {
                    directory: row.get(0)?,
                    photo_count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn timeline_years(&self) -> Result<Vec<TimelineBucket>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT CAST(strftime('%Y', taken_at) AS INTEGER), COUNT(*)
             FROM files WHERE taken_at IS NOT NULL AND missing_since IS NULL
             GROUP BY 1 ORDER BY 1 DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TimelineBucket {
                    year: row.get(0)?,
                    month: None,
                    day: None,
                    photo_count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Year/month/day counts, optionally narrowed to one year.
    pub fn timeline(&self, year: Option<i32>) -> Result<Vec<TimelineBucket>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT CAST(strftime('%Y', taken_at) AS INTEGER),
                    CAST(strftime('%m', taken_at) AS INTEGER),
                    CAST(strftime('%d', taken_at) AS INTEGER),
                    COUNT(*)
             FROM files
             WHERE taken_at IS NOT NULL AND missing_since IS NULL
               AND (?1 IS NULL OR CAST(strftime('%Y', taken_at) AS INTEGER) = ?1)
             GROUP BY 1, 2, 3 ORDER BY 1 DESC, 2 DESC, 3 DESC",
        )?;
        let rows = stmt
            .query_map(params![year], |row| {
                Ok(TimelineBucket {
                    year: row.get(0)?,
                    month: row.get(1)?,
                    day: row.get(2)?,
                    photo_count: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn location_countries(&self) -> Result<Vec<PlaceCount>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT country, NULL, COUNT(*) FROM locations
             WHERE country IS NOT NULL
             GROUP BY country ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PlaceCount {
                    country: row.get(0)?,
                    city: row.get(1)?,
                    photo_count: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn location_cities(&self, country: Option<&str>) -> Result<Vec<PlaceCount>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT country, city, COUNT(*) FROM locations
             WHERE city IS NOT NULL AND (?1 IS NULL OR country = ?1)
             GROUP BY country, city ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt
            .query_map(params![country], |row| {
                Ok(PlaceCount {
                    country: row.get(0)?,
                    city: row.get(1)?,
                    photo_count: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn map_points(&self, limit: u32) -> Result<Vec<MapPoint>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT file_id, latitude, longitude FROM locations LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(MapPoint {
                    file_id: row.get(0)?,
                    latitude: row.get(1)?,
                    longitude: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn large_files(&self, limit: u32) -> Result<Vec<FileMeta>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE missing_since IS NULL
             ORDER BY size_bytes DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit], file_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Files eligible for event detection: indexed, not missing, with a
    /// capture timestamp. Sorted chronologically.
    pub fn photos_with_capture_time(
        &self,
    ) -> Result<Vec<(String, String, Option<f64>, Option<f64>, Option<String>, Option<String>)>>
    {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT files.id, files.taken_at, files.gps_latitude, files.gps_longitude,
                    locations.city, locations.country
             FROM files LEFT JOIN locations ON locations.file_id = files.id
             WHERE files.taken_at IS NOT NULL AND files.missing_since IS NULL
             ORDER BY files.taken_at ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn stats(&self) -> Result<LibraryStats> {
        let conn = self.conn();
        let one = |sql: &str| -> Result<i64> {
            Ok(conn.query_row(sql, [], |row| row.get(0))?)
        };
        Ok(LibraryStats {
            photos: one("SELECT COUNT(*) FROM files WHERE missing_since IS NULL")?,
            favorites: one("SELECT COUNT(*) FROM files WHERE is_favorite = 1")?,
            total_bytes: one("SELECT COALESCE(SUM(size_bytes), 0) FROM files WHERE missing_since IS NULL")?,
            with_gps: one("SELECT COUNT(*) FROM files WHERE gps_latitude IS NOT NULL")?,
            faces: one("SELECT COUNT(*) FROM faces")?,
            persons: one("SELECT COUNT(*) FROM persons")?,
            events: one("SELECT COUNT(*) FROM events")?,
            tags: one("SELECT COUNT(*) FROM tags")?,
            duplicate_groups: one("SELECT COUNT(*) FROM duplicate_groups")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::seed_file;

    fn seed_library(catalog: &Catalog) {
        seed_file(catalog, "aa", "trips/a.jpg", 100, 0);
        seed_file(catalog, "bb", "trips/b.jpg", 2_000, 0);
        seed_file(catalog, "cc", "home/c.jpg", 50, 0);
        let conn = catalog.conn();
        conn.execute(
            "UPDATE files SET taken_at = '2024-07-01T10:00:00+00:00' WHERE id = 'aa'",
            [],
        )
        .unwrap();
        conn.execute(
            "UPDATE files SET taken_at = '2024-07-01T10:10:00+00:00', caption = 'dog on a beach'
             WHERE id = 'bb'",
            [],
        )
        .unwrap();
        conn.execute(
            "UPDATE files SET taken_at = '2023-01-05T08:00:00+00:00' WHERE id = 'cc'",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO locations (file_id, latitude, longitude, country, city, address)
             VALUES ('aa', 48.8566, 2.3522, 'FR', 'Paris', 'Paris, Ile-de-France, FR')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_filters_compose() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_library(&catalog);

        let page = catalog
            .list_photos(&PhotoFilter {
                directory: Some("trips".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 2);

        let page = catalog
            .list_photos(&PhotoFilter {
                year: Some(2024),
                min_size: Some(1_000),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.photos[0].id, "bb");

        let page = catalog
            .list_photos(&PhotoFilter {
                city: Some("Paris".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.photos[0].id, "aa");
    }

    #[test]
    fn test_search_spans_captions_and_places() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_library(&catalog);

        let by_caption = catalog
            .list_photos(&PhotoFilter {
                q: Some("beach".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_caption.total, 1);
        assert_eq!(by_caption.photos[0].id, "bb");

        let by_place = catalog
            .list_photos(&PhotoFilter {
                q: Some("paris".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_place.total, 1);
        assert_eq!(by_place.photos[0].id, "aa");

        let by_path = catalog
            .list_photos(&PhotoFilter {
                q: Some("home".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_path.total, 1);
    }

    #[test]
    fn test_timeline_groups_by_year() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_library(&catalog);

        let years = catalog.timeline_years().unwrap();
        assert_eq!(years.len(), 2);
        assert_eq!(years[0].year, 2024);
        assert_eq!(years[0].photo_count, 2);

        let days = catalog.timeline(Some(2024)).unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].day, Some(1));
    }

    #[test]
    fn test_stats_counts() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_library(&catalog);
        let stats = catalog.stats().unwrap();
        assert_eq!(stats.photos, 3);
        assert_eq!(stats.total_bytes, 2_150);
    }
}
