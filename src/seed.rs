//! One-off import of postal code coordinates from a bulk address CSV into
//! the postal code cache, so most lookups never reach the geocoder.

use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::cache::{CacheStore, CachedCoordinates, GeoCache};
use crate::domain::{Coordinates, normalize_postal_code};
use crate::error::{Result, ShelterError};

#[derive(Debug, Deserialize)]
struct AddressRow {
    #[serde(rename = "CITY")]
    city: String,
    #[serde(rename = "POSTAL_CODE")]
    postal_code: String,
    #[serde(rename = "LATITUDE")]
    latitude: String,
    #[serde(rename = "LONGITUDE")]
    longitude: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedStats {
    pub rows: usize,
    pub other_city: usize,
    pub invalid: usize,
    pub postal_codes: usize,
    pub written: usize,
}

/// Collect postal code coordinates for rows in the given cities.
/// City matching ignores case; a later row for the same postal code wins.
pub fn collect_postal_codes<R: Read>(
    reader: R,
    cities: &[String],
) -> Result<(CacheStore, SeedStats)> {
    let wanted: HashSet<String> = cities.iter().map(|c| c.trim().to_lowercase()).collect();
    let mut stats = SeedStats::default();
    let mut store = CacheStore::new();

    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    for (index, row) in csv_reader.deserialize::<AddressRow>().enumerate() {
        let row = row.map_err(|e| ShelterError::Seed(format!("row {}: {}", index + 1, e)))?;
        stats.rows += 1;

        if !wanted.contains(&row.city.trim().to_lowercase()) {
            stats.other_city += 1;
            continue;
        }

        let parsed = row
            .latitude
            .trim()
            .parse::<f64>()
            .ok()
            .zip(row.longitude.trim().parse::<f64>().ok())
            .and_then(|(lat, lng)| Coordinates::new(lat, lng).ok());

        match (normalize_postal_code(&row.postal_code), parsed) {
            (Some(key), Some(coords)) => {
                store.insert(key, CachedCoordinates::from(coords));
            }
            _ => stats.invalid += 1,
        }
    }

    stats.postal_codes = store.len();
    Ok((store, stats))
}

/// Seed `cache` from the CSV at `csv_path`. Entries already in the cache
/// are kept as they are.
pub fn seed_cache(csv_path: &Path, cities: &[String], cache: &GeoCache) -> Result<SeedStats> {
    let file = File::open(csv_path)
        .map_err(|e| ShelterError::Seed(format!("failed to open {}: {}", csv_path.display(), e)))?;
    let (store, mut stats) = collect_postal_codes(BufReader::new(file), cities)?;

    let snapshot = cache.load();
    if !snapshot.is_readable() {
        return Err(ShelterError::Seed(format!(
            "existing cache {} is unreadable",
            cache.path().display()
        )));
    }

    stats.written = cache.bulk_persist(&snapshot, store)?;
    log::info!(
        "Seeded {} postal codes from {} rows ({} other cities, {} invalid)",
        stats.postal_codes,
        stats.rows,
        stats.other_city,
        stats.invalid
    );
    Ok(stats)
}
