//! Offline reverse geocoding against an in-memory table of populated
//! places. No network; the place table is a data bundle under `models/`.

use std::collections::HashMap;
use std::path::Path;

use crate::error::StageError;
use crate::events::haversine_km;

use super::{StageCtx, StageOutcome};

pub fn run(ctx: &StageCtx, file_id: &str) -> Result<StageOutcome, StageError> {
    let meta = ctx
        .catalog
        .get_file(file_id)?
        .ok_or(StageError::MissingPrecondition("file record not found"))?;

    let (Some(lat), Some(lon)) = (meta.gps_latitude, meta.gps_longitude) else {
        return Ok(StageOutcome::Skipped("no_gps"));
    };
    let Some(index) = ctx.geocoder.index() else {
        return Ok(StageOutcome::Skipped("place_table_missing"));
    };
    let Some(place) = index.nearest(lat, lon) else {
        return Ok(StageOutcome::Skipped("no_place_in_range"));
    };

    ctx.catalog.write_location(
        file_id,
        lat,
        lon,
        None,
        &place.country,
        &place.name,
        &place.address(),
    )?;
    Ok(StageOutcome::Done)
}

#[derive(Debug, Clone)]
pub struct Place {
    pub name: String,
    pub admin1: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
}

impl Place {
    pub fn address(&self) -> String {
        if self.admin1.is_empty() {
            format!("{}, {}", self.name, self.country)
        } else {
            format!("{}, {}, {}", self.name, self.admin1, self.country)
        }
    }
}

/// Wrapper that tolerates a missing bundle: geocoding is then skipped.
pub struct Geocoder {
    index: Option<GeoIndex>,
}

impl Geocoder {
    pub fn load(places_path: &Path) -> Self {
        match GeoIndex::load_tsv(places_path) {
            Ok(index) => {
                tracing::info!(places = index.len(), "Reverse geocoder loaded");
                Self { index: Some(index) }
            }
            Err(e) => {
                tracing::warn!(path = %places_path.display(), error = %e,
                    "Place table unavailable, location names disabled");
                Self { index: None }
            }
        }
    }

    pub fn from_index(index: GeoIndex) -> Self {
        Self { index: Some(index) }
    }

    pub fn disabled() -> Self {
        Self { index: None }
    }

    pub fn index(&self) -> Option<&GeoIndex> {
        self.index.as_ref()
    }
}

/// Spatial index over places: one-degree grid cells, nearest-neighbor by
/// haversine over the query cell and an expanding ring of neighbors.
pub struct GeoIndex {
    places: Vec<Place>,
    grid: HashMap<(i32, i32), Vec<usize>>,
}

fn cell_of(lat: f64, lon: f64) -> (i32, i32) {
    (lat.floor() as i32, lon.floor() as i32)
}

impl GeoIndex {
    pub fn from_places(places: Vec<Place>) -> Self {
        let mut grid: HashMap<(i32, i32), Vec<usize>> = HashMap::new();
        for (i, place) in places.iter().enumerate() {
            grid.entry(cell_of(place.lat, place.lon)).or_default().push(i);
        }
        Self { places, grid }
    }

    /// Parse a geonames-style tab-separated table. Expected columns:
    /// geonameid, name, asciiname, alternatenames, latitude, longitude,
    /// feature class, feature code, country code, cc2, admin1, ...
    /// Malformed lines are skipped.
    pub fn load_tsv(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut places = Vec::new();
        for line in raw.lines() {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 9 {
                continue;
            }
            let (Ok(lat), Ok(lon)) = (cols[4].parse::<f64>(), cols[5].parse::<f64>()) else {
                continue;
            };
            places.push(Place {
                name: cols[1].to_string(),
                admin1: cols.get(10).unwrap_or(&"").to_string(),
                country: cols[8].to_string(),
                lat,
                lon,
            });
        }
        if places.is_empty() {
            anyhow::bail!("no places parsed from {}", path.display());
        }
        Ok(Self::from_places(places))
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    /// Nearest place within a few degrees of the query, or None when the
    /// coordinates fall in an empty region of the table.
    pub fn nearest(&self, lat: f64, lon: f64) -> Option<&Place> {
        let (cell_lat, cell_lon) = cell_of(lat, lon);
        let mut best: Option<(usize, f64)> = None;

        // Expand ring by ring; once a ring yields a hit, one further ring
        // is enough to beat corner effects.
        let mut hit_ring: Option<i32> = None;
        for ring in 0..=3 {
            if let Some(found) = hit_ring {
                if ring > found + 1 {
                    break;
                }
            }
            for d_lat in -ring..=ring {
                for d_lon in -ring..=ring {
                    if d_lat.abs() != ring && d_lon.abs() != ring {
                        continue; // interior cells already visited
                    }
                    let Some(bucket) = self.grid.get(&(cell_lat + d_lat, cell_lon + d_lon)) else {
                        continue;
                    };
                    for &i in bucket {
                        let place = &self.places[i];
                        let distance = haversine_km(lat, lon, place.lat, place.lon);
                        if best.map_or(true, |(_, d)| distance < d) {
                            best = Some((i, distance));
                        }
                    }
                    if best.is_some() && hit_ring.is_none() {
                        hit_ring = Some(ring);
                    }
                }
            }
        }

        best.map(|(i, _)| &self.places[i])
    }
}
