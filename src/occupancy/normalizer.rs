use chrono::NaiveDate;

use crate::domain::record::keys;
use crate::domain::{CapacityType, CountField, RawRecord, Shelter};
use crate::error::ShelterError;

/// A shelter tagged with the snapshot date of the row it came from
#[derive(Debug, Clone, PartialEq)]
pub struct DatedShelter {
    pub date: NaiveDate,
    pub shelter: Shelter,
}

/// Per-batch tally of what happened to each row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub kept: usize,
    pub unknown_capacity_type: usize,
    pub no_space: usize,
    pub anomalies: usize,
}

enum Outcome {
    Kept(DatedShelter),
    UnknownCapacityType,
    NoSpace,
    Anomaly(ShelterError),
}

fn anomaly(message: String) -> Outcome {
    Outcome::Anomaly(ShelterError::SchemaAnomaly(message))
}

/// Decide what a single row becomes.
///
/// # Algorithm
/// 1. Classify the capacity label; unknown labels are dropped
/// 2. Read the unoccupied counter matching the capacity type
/// 3. Missing or non-numeric counter is a schema anomaly
/// 4. Zero or negative availability is dropped
/// 5. The snapshot date must parse, otherwise schema anomaly
fn normalize_record(record: &RawRecord) -> Outcome {
    let capacity_type = match record
        .text(keys::CAPACITY_TYPE)
        .as_deref()
        .and_then(CapacityType::from_label)
    {
        Some(c) => c,
        None => return Outcome::UnknownCapacityType,
    };

    let unoccupied_key = capacity_type.unoccupied_key();
    let available = match record.count_field(unoccupied_key) {
        CountField::Value(n) => n,
        CountField::Missing => {
            return anomaly(format!("{} missing for {}", unoccupied_key, describe(record)));
        }
        CountField::Invalid => {
            return anomaly(format!(
                "{} is not a number for {}",
                unoccupied_key,
                describe(record)
            ));
        }
    };

    if available <= 0 {
        return Outcome::NoSpace;
    }

    let Some(date) = record.snapshot_date() else {
        return anomaly(format!(
            "{} missing or unparseable for {}",
            keys::OCCUPANCY_DATE,
            describe(record)
        ));
    };

    let shelter = Shelter::new(record.text_or_empty(keys::LOCATION_NAME), capacity_type)
        .with_address(record.text_or_empty(keys::LOCATION_ADDRESS))
        .with_postal_code(record.text(keys::LOCATION_POSTAL_CODE).as_deref())
        .with_sector(record.text_or_empty(keys::SECTOR))
        .with_service_type(record.text_or_empty(keys::SERVICE_TYPE))
        .with_beds(
            record.count(keys::UNOCCUPIED_BEDS),
            record.count(keys::TOTAL_BEDS),
        )
        .with_rooms(
            record.count(keys::UNOCCUPIED_ROOMS),
            record.count(keys::TOTAL_ROOMS),
        );

    Outcome::Kept(DatedShelter { date, shelter })
}

fn describe(record: &RawRecord) -> String {
    record
        .text(keys::LOCATION_NAME)
        .unwrap_or_else(|| "<unnamed location>".to_string())
}

/// Turn raw rows into shelters with open capacity.
///
/// Malformed rows are logged and skipped; they never fail the batch.
pub fn normalize_records(records: &[RawRecord]) -> (Vec<DatedShelter>, NormalizeStats) {
    let mut stats = NormalizeStats::default();
    let mut shelters = Vec::new();

    for record in records {
        match normalize_record(record) {
            Outcome::Kept(dated) => {
                stats.kept += 1;
                shelters.push(dated);
            }
            Outcome::UnknownCapacityType => stats.unknown_capacity_type += 1,
            Outcome::NoSpace => stats.no_space += 1,
            Outcome::Anomaly(e) => {
                log::warn!("{}", e);
                stats.anomalies += 1;
            }
        }
    }

    log::debug!(
        "Normalized {} rows: {} kept, {} unknown capacity type, {} full, {} anomalies",
        records.len(),
        stats.kept,
        stats.unknown_capacity_type,
        stats.no_space,
        stats.anomalies
    );

    (shelters, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn record(value: Value) -> RawRecord {
        serde_json::from_value(value).unwrap()
    }

    fn room_row(unoccupied: Value) -> RawRecord {
        record(json!({
            "OCCUPANCY_DATE": "2024-05-02",
            "CAPACITY_TYPE": "Room Based Capacity",
            "LOCATION_NAME": "Family Residence",
            "LOCATION_ADDRESS": "4222 Kingston Rd",
            "LOCATION_POSTAL_CODE": "M1E 2M6",
            "SECTOR": "Families",
            "OVERNIGHT_SERVICE_TYPE": "Motel/Hotel Shelter",
            "CAPACITY_ACTUAL_ROOM": 30,
            "UNOCCUPIED_ROOMS": unoccupied,
            "CAPACITY_ACTUAL_BED": null,
            "UNOCCUPIED_BEDS": null
        }))
    }

    #[test]
    fn test_unknown_capacity_type_dropped() {
        let rows = vec![
            record(json!({"CAPACITY_TYPE": "Mat Based Capacity", "UNOCCUPIED_BEDS": 4})),
            record(json!({"UNOCCUPIED_BEDS": 4})),
            record(json!({"CAPACITY_TYPE": 7, "UNOCCUPIED_BEDS": 4})),
        ];

        let (shelters, stats) = normalize_records(&rows);
        assert!(shelters.is_empty());
        assert_eq!(stats.unknown_capacity_type, 3);
    }

    #[test]
    fn test_room_based_with_space() {
        let (shelters, stats) = normalize_records(&[room_row(json!("2"))]);

        assert_eq!(stats.kept, 1);
        let dated = &shelters[0];
        assert_eq!(dated.date, NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
        let shelter = &dated.shelter;
        assert_eq!(shelter.capacity_type, CapacityType::RoomBased);
        assert_eq!(shelter.name, "Family Residence");
        assert_eq!(shelter.postal_code.as_deref(), Some("m1e 2m6"));
        assert_eq!(shelter.available_rooms, 2);
        assert_eq!(shelter.total_rooms, 30);
        assert_eq!(shelter.available_beds, 0);
        assert_eq!(shelter.total_beds, 0);
        assert!(shelter.coordinates().is_none());
    }

    #[test]
    fn test_missing_counter_is_anomaly() {
        let (shelters, stats) = normalize_records(&[room_row(Value::Null), room_row(json!(""))]);
        assert!(shelters.is_empty());
        assert_eq!(stats.anomalies, 2);
    }

    #[test]
    fn test_non_numeric_counter_is_anomaly() {
        let (shelters, stats) = normalize_records(&[room_row(json!("several"))]);
        assert!(shelters.is_empty());
        assert_eq!(stats.anomalies, 1);
    }

    #[test]
    fn test_no_space_dropped() {
        let (shelters, stats) = normalize_records(&[room_row(json!(0)), room_row(json!(-3))]);
        assert!(shelters.is_empty());
        assert_eq!(stats.no_space, 2);
        assert_eq!(stats.anomalies, 0);
    }

    #[test]
    fn test_bad_date_is_anomaly() {
        let rows = vec![
            record(json!({
                "CAPACITY_TYPE": "Room Based Capacity",
                "UNOCCUPIED_ROOMS": 2,
                "OCCUPANCY_DATE": "yesterday"
            })),
            record(json!({
                "CAPACITY_TYPE": "Room Based Capacity",
                "UNOCCUPIED_ROOMS": 2
            })),
        ];

        let (shelters, stats) = normalize_records(&rows);
        assert!(shelters.is_empty());
        assert_eq!(stats.anomalies, 2);
    }

    #[test]
    fn test_counts_clamped_and_defaulted() {
        let row = record(json!({
            "OCCUPANCY_DATE": "2024-05-02",
            "CAPACITY_TYPE": "Bed Based Capacity",
            "LOCATION_NAME": "Dixon Hall",
            "UNOCCUPIED_BEDS": "5",
            "CAPACITY_ACTUAL_BED": -10,
            "UNOCCUPIED_ROOMS": "n/a"
        }));

        let (shelters, _) = normalize_records(&[row]);
        let shelter = &shelters[0].shelter;
        assert_eq!(shelter.available_beds, 5);
        assert_eq!(shelter.total_beds, 0);
        assert_eq!(shelter.available_rooms, 0);
        assert_eq!(shelter.total_rooms, 0);
        assert_eq!(shelter.address, "");
        assert_eq!(shelter.postal_code, None);
    }
}
