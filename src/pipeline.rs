use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;

use crate::api::{CatalogSource, Geocoder};
use crate::cache::{CacheStore, GeoCache};
use crate::domain::{CapacityType, Coordinates, Shelter};
use crate::error::Result;
use crate::occupancy::{normalize_records, select_latest};

/// JSON body served to the dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    pub shelter_availabilities: Vec<Shelter>,
    pub update_date: Option<NaiveDate>,
}

/// What happened while attaching coordinates to a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichStats {
    pub cache_hits: usize,
    pub geocoded: usize,
    pub failed: usize,
    pub without_postal_code: usize,
    pub persisted: usize,
}

/// Fetch → normalize → pick latest date → attach coordinates
pub struct AvailabilityPipeline<C, G> {
    catalog: C,
    geocoder: G,
    cache: GeoCache,
}

impl<C: CatalogSource, G: Geocoder> AvailabilityPipeline<C, G> {
    pub fn new(catalog: C, geocoder: G, cache: GeoCache) -> Self {
        Self {
            catalog,
            geocoder,
            cache,
        }
    }

    pub fn cache(&self) -> &GeoCache {
        &self.cache
    }

    pub fn geocoder(&self) -> &G {
        &self.geocoder
    }

    /// Run the whole pipeline once.
    ///
    /// Only an unavailable upstream catalog fails the run. Bad rows,
    /// geocoding failures and cache write failures are logged and leave
    /// partial data behind.
    pub fn run(&self) -> Result<(Option<NaiveDate>, Vec<Shelter>)> {
        let records = self.catalog.fetch_records()?;
        let (dated, _) = normalize_records(&records);
        let (update_date, mut shelters) = select_latest(dated);

        // Bed-based first, room-based after; stable within each group
        shelters.sort_by_key(|s| match s.capacity_type {
            CapacityType::BedBased => 0,
            CapacityType::RoomBased => 1,
        });

        let stats = self.enrich(&mut shelters);
        log::info!(
            "Snapshot {}: {} shelters with space \
             ({} cached, {} geocoded, {} failed, {} without postal code)",
            update_date.map_or_else(|| "none".to_string(), |d| d.to_string()),
            shelters.len(),
            stats.cache_hits,
            stats.geocoded,
            stats.failed,
            stats.without_postal_code
        );

        Ok((update_date, shelters))
    }

    pub fn run_response(&self) -> Result<AvailabilityResponse> {
        let (update_date, shelter_availabilities) = self.run()?;
        Ok(AvailabilityResponse {
            shelter_availabilities,
            update_date,
        })
    }

    /// Attach coordinates to every shelter that has a postal code.
    ///
    /// The cache is read once up front. Each missing postal code is sent to
    /// the geocoder at most once, and everything newly resolved is persisted
    /// in a single write after the whole batch.
    pub fn enrich(&self, shelters: &mut [Shelter]) -> EnrichStats {
        let mut stats = EnrichStats::default();
        let snapshot = self.cache.load();
        let mut fresh = CacheStore::new();
        let mut failed: HashSet<String> = HashSet::new();

        for shelter in shelters.iter_mut() {
            let Some(postal_code) = shelter.postal_code.clone() else {
                stats.without_postal_code += 1;
                continue;
            };

            if let Some(coords) = snapshot.lookup(&postal_code) {
                shelter.annotate(coords);
                stats.cache_hits += 1;
                continue;
            }

            if let Some(coords) = fresh
                .get(&postal_code)
                .and_then(|e| Coordinates::new(e.lat, e.lng).ok())
            {
                shelter.annotate(coords);
                continue;
            }

            if failed.contains(&postal_code) {
                continue;
            }

            match self.geocoder.resolve(&postal_code) {
                Ok(coords) => {
                    shelter.annotate(coords);
                    fresh.insert(postal_code, coords.into());
                    stats.geocoded += 1;
                }
                Err(e) => {
                    log::warn!("{}", e);
                    failed.insert(postal_code);
                    stats.failed += 1;
                }
            }
        }

        if !fresh.is_empty() {
            match self.cache.bulk_persist(&snapshot, fresh) {
                Ok(written) => stats.persisted = written,
                Err(e) => log::error!("{}", e),
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawRecord;
    use crate::error::ShelterError;
    use serde_json::{Value, json};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::tempdir;

    struct StubCatalog(Option<Vec<Value>>);

    impl CatalogSource for StubCatalog {
        fn fetch_records(&self) -> Result<Vec<RawRecord>> {
            match &self.0 {
                Some(rows) => Ok(rows
                    .iter()
                    .map(|r| serde_json::from_value(r.clone()).unwrap())
                    .collect()),
                None => Err(ShelterError::UpstreamUnavailable(
                    "connection refused".to_string(),
                )),
            }
        }
    }

    /// Resolves known postal codes and records every call
    #[derive(Default)]
    struct StubGeocoder {
        known: HashMap<String, (f64, f64)>,
        calls: RefCell<Vec<String>>,
    }

    impl StubGeocoder {
        fn with(entries: &[(&str, f64, f64)]) -> Self {
            Self {
                known: entries
                    .iter()
                    .map(|(k, lat, lng)| (k.to_string(), (*lat, *lng)))
                    .collect(),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    impl Geocoder for StubGeocoder {
        fn resolve(&self, postal_code: &str) -> Result<Coordinates> {
            self.calls.borrow_mut().push(postal_code.to_string());
            match self.known.get(postal_code) {
                Some((lat, lng)) => Coordinates::new(*lat, *lng),
                None => Err(ShelterError::GeocodingFailure {
                    postal_code: postal_code.to_string(),
                    reason: "no results".to_string(),
                }),
            }
        }
    }

    fn row(date: &str, name: &str, capacity: &str, postal: Option<&str>, free: i64) -> Value {
        let (key, total_key) = if capacity == "Room Based Capacity" {
            ("UNOCCUPIED_ROOMS", "CAPACITY_ACTUAL_ROOM")
        } else {
            ("UNOCCUPIED_BEDS", "CAPACITY_ACTUAL_BED")
        };
        let mut value = json!({
            "OCCUPANCY_DATE": date,
            "CAPACITY_TYPE": capacity,
            "LOCATION_NAME": name,
            "LOCATION_ADDRESS": "1 Main St",
            "LOCATION_POSTAL_CODE": postal,
            "SECTOR": "Mixed Adult",
            "OVERNIGHT_SERVICE_TYPE": "Shelter",
        });
        value[key] = json!(free);
        value[total_key] = json!(20);
        value
    }

    const ROOM: &str = "Room Based Capacity";
    const BED: &str = "Bed Based Capacity";

    #[test]
    fn test_zero_availability_dropped_end_to_end() {
        let dir = tempdir().unwrap();
        let catalog = StubCatalog(Some(vec![
            row("2024-05-02", "Same Place", ROOM, None, 2),
            row("2024-05-02", "Same Place", BED, None, 0),
        ]));
        let pipeline = AvailabilityPipeline::new(
            catalog,
            StubGeocoder::default(),
            GeoCache::new(dir.path().join("c.json")),
        );

        let (date, shelters) = pipeline.run().unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 5, 2));
        assert_eq!(shelters.len(), 1);
        assert_eq!(shelters[0].capacity_type, CapacityType::RoomBased);
        assert_eq!(shelters[0].available_rooms, 2);
    }

    #[test]
    fn test_bed_based_first_in_selection_order() {
        let dir = tempdir().unwrap();
        let catalog = StubCatalog(Some(vec![
            row("2024-05-02", "room-1", ROOM, None, 1),
            row("2024-05-02", "bed-1", BED, None, 1),
            row("2024-05-01", "stale", BED, None, 9),
            row("2024-05-02", "room-2", ROOM, None, 1),
            row("2024-05-02", "bed-2", BED, None, 1),
        ]));
        let pipeline = AvailabilityPipeline::new(
            catalog,
            StubGeocoder::default(),
            GeoCache::new(dir.path().join("c.json")),
        );

        let (_, shelters) = pipeline.run().unwrap();
        let names: Vec<&str> = shelters.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["bed-1", "bed-2", "room-1", "room-2"]);
    }

    #[test]
    fn test_empty_catalog() {
        let dir = tempdir().unwrap();
        let pipeline = AvailabilityPipeline::new(
            StubCatalog(Some(Vec::new())),
            StubGeocoder::default(),
            GeoCache::new(dir.path().join("c.json")),
        );

        let response = pipeline.run_response().unwrap();
        assert_eq!(response.update_date, None);
        assert!(response.shelter_availabilities.is_empty());

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json, json!({"shelterAvailabilities": [], "updateDate": null}));
    }

    #[test]
    fn test_upstream_failure_propagates() {
        let dir = tempdir().unwrap();
        let pipeline = AvailabilityPipeline::new(
            StubCatalog(None),
            StubGeocoder::default(),
            GeoCache::new(dir.path().join("c.json")),
        );

        assert!(matches!(
            pipeline.run(),
            Err(ShelterError::UpstreamUnavailable(_))
        ));
    }

    #[test]
    fn test_geocoding_failure_is_isolated() {
        let dir = tempdir().unwrap();
        let catalog = StubCatalog(Some(vec![
            row("2024-05-02", "A", BED, Some("M0A 0A0"), 1),
            row("2024-05-02", "B", BED, Some("M5V 2T6"), 1),
        ]));
        let geocoder = StubGeocoder::with(&[("m5v 2t6", 43.64, -79.39)]);
        let pipeline =
            AvailabilityPipeline::new(catalog, geocoder, GeoCache::new(dir.path().join("c.json")));

        let response = pipeline.run_response().unwrap();
        let shelters = &response.shelter_availabilities;
        assert_eq!(shelters.len(), 2);
        assert!(shelters[0].coordinates().is_none());
        let b = shelters[1].coordinates().unwrap();
        assert_eq!((b.lat(), b.lng()), (43.64, -79.39));

        let json = serde_json::to_value(&response).unwrap();
        assert!(json["shelterAvailabilities"][0]["lat"].is_null());
        assert_eq!(json["updateDate"], "2024-05-02");
    }

    #[test]
    fn test_resolved_code_cached_for_next_batch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.json");
        let rows = vec![
            row("2024-05-02", "A", BED, Some("M5V 2T6"), 1),
            row("2024-05-02", "B", ROOM, Some("m5v 2t6"), 1),
            row("2024-05-02", "C", ROOM, None, 1),
        ];

        let first = AvailabilityPipeline::new(
            StubCatalog(Some(rows.clone())),
            StubGeocoder::with(&[("m5v 2t6", 43.64, -79.39)]),
            GeoCache::new(&path),
        );
        let (_, shelters) = first.run().unwrap();
        assert_eq!(first.geocoder().call_count(), 1);
        assert!(shelters[0].coordinates().is_some());
        assert!(shelters[1].coordinates().is_some());
        assert!(shelters[2].coordinates().is_none());

        let second = AvailabilityPipeline::new(
            StubCatalog(Some(rows)),
            StubGeocoder::default(),
            GeoCache::new(&path),
        );
        let (_, shelters) = second.run().unwrap();
        assert_eq!(second.geocoder().call_count(), 0);
        assert!(shelters[0].coordinates().is_some());
    }

    #[test]
    fn test_failed_code_tried_once_per_batch() {
        let dir = tempdir().unwrap();
        let catalog = StubCatalog(Some(vec![
            row("2024-05-02", "A", BED, Some("M0A 0A0"), 1),
            row("2024-05-02", "B", BED, Some("M0A 0A0"), 1),
        ]));
        let pipeline = AvailabilityPipeline::new(
            catalog,
            StubGeocoder::default(),
            GeoCache::new(dir.path().join("c.json")),
        );

        pipeline.run().unwrap();
        assert_eq!(pipeline.geocoder().call_count(), 1);
        assert!(!pipeline.cache().path().exists());
    }

    #[test]
    fn test_out_of_range_cache_entry_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(&path, r#"{"m5v 2t6": {"lat": 95.0, "lng": 200.0}}"#).unwrap();
        let catalog = StubCatalog(Some(vec![row("2024-05-02", "A", BED, Some("M5V 2T6"), 1)]));
        let pipeline = AvailabilityPipeline::new(
            catalog,
            StubGeocoder::with(&[("m5v 2t6", 43.64, -79.39)]),
            GeoCache::new(&path),
        );

        let (_, shelters) = pipeline.run().unwrap();
        let coords = shelters[0].coordinates().unwrap();
        assert_eq!(coords.lat(), 43.64);
        assert_eq!(
            GeoCache::new(&path).load().lookup("m5v 2t6").map(|c| c.lat()),
            Some(43.64)
        );
    }

    #[test]
    fn test_unreadable_cache_location_still_returns_coordinates() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let catalog = StubCatalog(Some(vec![row("2024-05-02", "A", BED, Some("M5V 2T6"), 1)]));
        let pipeline = AvailabilityPipeline::new(
            catalog,
            StubGeocoder::with(&[("m5v 2t6", 43.64, -79.39)]),
            GeoCache::new(blocker.join("c.json")),
        );

        let (_, shelters) = pipeline.run().unwrap();
        assert!(shelters[0].coordinates().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_cache_write_failure_still_returns_coordinates() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("cache-dir");
        std::os::unix::fs::symlink(dir.path().join("gone").join("deeper"), &link).unwrap();
        let cache = GeoCache::new(link.join("c.json"));
        assert!(cache.load().is_readable());
        let pipeline = AvailabilityPipeline::new(
            StubCatalog(None),
            StubGeocoder::with(&[("m5v 2t6", 43.64, -79.39)]),
            cache,
        );

        let mut shelters = vec![
            Shelter::new("A", CapacityType::BedBased).with_postal_code(Some("M5V 2T6")),
        ];
        let stats = pipeline.enrich(&mut shelters);

        assert_eq!(stats.geocoded, 1);
        assert_eq!(stats.persisted, 0);
        assert_eq!(shelters[0].coordinates().map(|c| c.lat()), Some(43.64));
        assert!(!link.exists());
    }
}
