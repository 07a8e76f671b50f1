//! Batch event detection: cluster photos by capture time and location.
//!
//! Runs when the pipeline settles. Walks all dated photos chronologically
//! and starts a new event when the time gap exceeds `TIME_GAP_HOURS` or
//! the distance to the previous geotagged photo exceeds `JUMP_KM`.
//! Events are derived data and rebuilt wholesale each run.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::db::{Catalog, EventDraft};

/// A new event begins when the gap since the previous photo exceeds this.
pub const TIME_GAP_HOURS: i64 = 6;

/// ... or when the location jumps farther than this from the previous
/// geotagged photo in the running event.
pub const JUMP_KM: f64 = 50.0;

/// Clusters below this size are not persisted; a lone photo is not an
/// event.
pub const MIN_PHOTOS_PER_EVENT: usize = 2;

#[derive(Debug, Clone)]
struct DatedPhoto {
    id: String,
    taken_at: DateTime<Utc>,
    lat: Option<f64>,
    lon: Option<f64>,
    city: Option<String>,
    country: Option<String>,
}

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Detect events over the whole catalog. Returns the number persisted.
pub fn detect_events(catalog: &Catalog) -> Result<usize> {
    let rows = catalog.photos_with_capture_time()?;

    let mut photos = Vec::with_capacity(rows.len());
    for (id, taken_at, lat, lon, city, country) in rows {
        let Ok(parsed) = DateTime::parse_from_rfc3339(&taken_at) else {
            continue;
        };
        photos.push(DatedPhoto {
            id,
            taken_at: parsed.with_timezone(&Utc),
            lat,
            lon,
            city,
            country,
        });
    }

    let clusters = cluster(&photos);
    let drafts: Vec<EventDraft> = clusters
        .iter()
        .filter(|c| c.len() >= MIN_PHOTOS_PER_EVENT)
        .map(|c| draft_for(c))
        .collect();

    catalog.replace_events(&drafts)?;
    tracing::info!(events = drafts.len(), photos = photos.len(), "Event detection complete");
    Ok(drafts.len())
}

fn cluster(photos: &[DatedPhoto]) -> Vec<Vec<DatedPhoto>> {
    let mut clusters: Vec<Vec<DatedPhoto>> = Vec::new();
    let mut current: Vec<DatedPhoto> = Vec::new();
    // Location of the last geotagged photo in the running cluster.
    let mut last_position: Option<(f64, f64)> = None;

    for photo in photos {
        let mut split = false;

        if let Some(prev) = current.last() {
            let gap = photo.taken_at - prev.taken_at;
            if gap > Duration::hours(TIME_GAP_HOURS) {
                split = true;
            }
        }

        if !split {
            if let (Some((last_lat, last_lon)), Some(lat), Some(lon)) =
                (last_position, photo.lat, photo.lon)
            {
                if haversine_km(last_lat, last_lon, lat, lon) > JUMP_KM {
                    split = true;
                }
            }
        }

        if split && !current.is_empty() {
            clusters.push(std::mem::take(&mut current));
            last_position = None;
        }

        if let (Some(lat), Some(lon)) = (photo.lat, photo.lon) {
            last_position = Some((lat, lon));
        }
        current.push(photo.clone());
    }

    if !current.is_empty() {
        clusters.push(current);
    }
    clusters
}

fn draft_for(cluster: &[DatedPhoto]) -> EventDraft {
    let start = cluster.first().unwrap().taken_at;
    let end = cluster.last().unwrap().taken_at;
    let location = dominant_location(cluster);
    let name = event_name(start, end, location.as_deref());

    EventDraft {
        name,
        start_at: start.to_rfc3339(),
        end_at: end.to_rfc3339(),
        location,
        cover_file_id: cluster.first().unwrap().id.clone(),
        members: cluster.iter().map(|p| p.id.clone()).collect(),
    }
}

/// "City, Country" for the most frequently resolved city in the cluster.
fn dominant_location(cluster: &[DatedPhoto]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for photo in cluster {
        if let Some(city) = photo.city.as_deref() {
            *counts.entry(city).or_default() += 1;
        }
    }
    let (city, _) = counts.into_iter().max_by_key(|(_, n)| *n)?;
    let country = cluster
        .iter()
        .find(|p| p.city.as_deref() == Some(city))
        .and_then(|p| p.country.clone());
    Some(match country {
        Some(country) => format!("{city}, {country}"),
        None => city.to_string(),
    })
}

fn event_name(start: DateTime<Utc>, end: DateTime<Utc>, location: Option<&str>) -> String {
    let span = end - start;

    let time_part = if span < Duration::hours(6) {
        use chrono::Timelike;
        let half = if start.hour() >= 12 { "afternoon" } else { "morning" };
        format!("{} {half}", start.format("%b %-d, %Y"))
    } else if span < Duration::days(1) {
        start.format("%b %-d, %Y").to_string()
    } else if span < Duration::days(7) && start.format("%m%Y").to_string() == end.format("%m%Y").to_string()
    {
        format!("{}-{}", start.format("%b %-d"), end.format("%-d, %Y"))
    } else {
        format!("{} - {}", start.format("%b %-d"), end.format("%b %-d, %Y"))
    };

    match location {
        Some(location) => format!("{location} - {time_part}"),
        None => time_part,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::seed_file;

    fn seed_photo(
        catalog: &Catalog,
        id: &str,
        taken_at: &str,
        gps: Option<(f64, f64)>,
        place: Option<(&str, &str)>,
    ) {
        seed_file(catalog, id, &format!("{id}.jpg"), 1, 0);
        catalog
            .conn()
            .execute(
                "UPDATE files SET taken_at = ?2, gps_latitude = ?3, gps_longitude = ?4
                 WHERE id = ?1",
                rusqlite::params![id, taken_at, gps.map(|g| g.0), gps.map(|g| g.1)],
            )
            .unwrap();
        if let (Some((lat, lon)), Some((city, country))) = (gps, place) {
            catalog
                .conn()
                .execute(
                    "INSERT INTO locations (file_id, latitude, longitude, country, city, address)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5 || ', ' || ?4)",
                    rusqlite::params![id, lat, lon, country, city],
                )
                .unwrap();
        }
    }

    #[test]
    fn test_haversine_known_distance() {
        // Paris to London is roughly 344 km.
        let d = haversine_km(48.8566, 2.3522, 51.5074, -0.1278);
        assert!((d - 344.0).abs() < 10.0, "got {d}");
        assert!(haversine_km(48.0, 2.0, 48.0, 2.0) < 1e-9);
    }

    #[test]
    fn test_time_gap_splits_events() {
        let catalog = Catalog::open_in_memory().unwrap();
        let paris = Some((48.8566, 2.3522));
        let place = Some(("Paris", "FR"));
        seed_photo(&catalog, "a1", "2024-07-01T10:00:00+00:00", paris, place);
        seed_photo(&catalog, "a2", "2024-07-01T10:30:00+00:00", paris, place);
        seed_photo(&catalog, "a3", "2024-07-01T11:00:00+00:00", paris, place);
        // More than six hours later: a second event.
        seed_photo(&catalog, "b1", "2024-07-01T20:00:00+00:00", paris, place);
        seed_photo(&catalog, "b2", "2024-07-01T20:10:00+00:00", paris, place);
        seed_photo(&catalog, "b3", "2024-07-01T20:20:00+00:00", paris, place);

        let count = detect_events(&catalog).unwrap();
        assert_eq!(count, 2);
        let events = catalog.list_events().unwrap();
        assert!(events.iter().all(|e| e.photo_count == 3));
        assert!(events[0].name.contains("Paris, FR"));
    }

    #[test]
    fn test_location_jump_splits_events() {
        let catalog = Catalog::open_in_memory().unwrap();
        // Three in Paris, three in Lyon (~390 km away) within the same hour.
        for (i, t) in ["10:00", "10:05", "10:10"].iter().enumerate() {
            seed_photo(
                &catalog,
                &format!("p{i}"),
                &format!("2024-07-01T{t}:00+00:00"),
                Some((48.8566, 2.3522)),
                Some(("Paris", "FR")),
            );
        }
        for (i, t) in ["10:20", "10:25", "10:30"].iter().enumerate() {
            seed_photo(
                &catalog,
                &format!("l{i}"),
                &format!("2024-07-01T{t}:00+00:00"),
                Some((45.7640, 4.8357)),
                Some(("Lyon", "FR")),
            );
        }

        assert_eq!(detect_events(&catalog).unwrap(), 2);
    }

    #[test]
    fn test_singletons_are_dropped() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_photo(&catalog, "a", "2024-07-01T10:00:00+00:00", None, None);
        // A second photo a day later: two singletons, no events.
        seed_photo(&catalog, "b", "2024-07-02T18:00:00+00:00", None, None);
        assert_eq!(detect_events(&catalog).unwrap(), 0);
        assert!(catalog.list_events().unwrap().is_empty());

        // A pair within the gap forms an event.
        seed_photo(&catalog, "c", "2024-07-02T18:05:00+00:00", None, None);
        assert_eq!(detect_events(&catalog).unwrap(), 1);
    }

    #[test]
    fn test_photos_without_gps_stay_in_running_event() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_photo(
            &catalog,
            "a",
            "2024-07-01T10:00:00+00:00",
            Some((48.8566, 2.3522)),
            Some(("Paris", "FR")),
        );
        seed_photo(&catalog, "b", "2024-07-01T10:10:00+00:00", None, None);
        seed_photo(
            &catalog,
            "c",
            "2024-07-01T10:20:00+00:00",
            Some((48.8570, 2.3530)),
            Some(("Paris", "FR")),
        );

        assert_eq!(detect_events(&catalog).unwrap(), 1);
        let events = catalog.list_events().unwrap();
        assert_eq!(events[0].photo_count, 3);
    }

    #[test]
    fn test_event_name_formats() {
        let start = DateTime::parse_from_rfc3339("2024-07-01T09:00:00+00:00")
            .unwrap()
            .with_timezone(&Utc);
        let short_end = start + Duration::minutes(30);
        assert_eq!(
            event_name(start, short_end, Some("Paris, FR")),
            "Paris, FR - Jul 1, 2024 morning"
        );

        let multi_day = start + Duration::days(2);
        assert_eq!(event_name(start, multi_day, None), "Jul 1-3, 2024");

        let cross_month = start + Duration::days(40);
        assert_eq!(event_name(start, cross_month, None), "Jul 1 - Aug 10, 2024");
    }
}
