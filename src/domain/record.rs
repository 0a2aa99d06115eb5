use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field names used by the daily shelter occupancy dataset
pub mod keys {
    pub const CAPACITY_TYPE: &str = "CAPACITY_TYPE";
    pub const OCCUPANCY_DATE: &str = "OCCUPANCY_DATE";
    pub const LOCATION_NAME: &str = "LOCATION_NAME";
    pub const LOCATION_ADDRESS: &str = "LOCATION_ADDRESS";
    pub const LOCATION_POSTAL_CODE: &str = "LOCATION_POSTAL_CODE";
    pub const SECTOR: &str = "SECTOR";
    pub const SERVICE_TYPE: &str = "OVERNIGHT_SERVICE_TYPE";
    pub const TOTAL_BEDS: &str = "CAPACITY_ACTUAL_BED";
    pub const UNOCCUPIED_BEDS: &str = "UNOCCUPIED_BEDS";
    pub const TOTAL_ROOMS: &str = "CAPACITY_ACTUAL_ROOM";
    pub const UNOCCUPIED_ROOMS: &str = "UNOCCUPIED_ROOMS";
}

/// Outcome of reading a counter field from a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountField {
    /// Absent, null or empty string
    Missing,
    /// Present but not an integer
    Invalid,
    Value(i64),
}

impl CountField {
    /// Coerce to a non-negative count: anything unusable is 0, negatives clamp to 0
    pub fn coerce(self) -> u32 {
        match self {
            CountField::Value(n) => n.clamp(0, i64::from(u32::MAX)) as u32,
            CountField::Missing | CountField::Invalid => 0,
        }
    }
}

/// One untyped row from the datastore.
///
/// Nothing about field presence or JSON type is trusted; accessors return
/// `None`/[`CountField::Missing`] instead of failing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Read a free-text field. Numbers and booleans are stringified.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Free-text field with missing values as the empty string
    pub fn text_or_empty(&self, key: &str) -> String {
        self.text(key).unwrap_or_default()
    }

    pub fn count_field(&self, key: &str) -> CountField {
        match self.0.get(key) {
            None | Some(Value::Null) => CountField::Missing,
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    CountField::Value(i)
                } else {
                    n.as_f64()
                        .and_then(integral)
                        .map_or(CountField::Invalid, CountField::Value)
                }
            }
            Some(Value::String(s)) => {
                let s = s.trim();
                if s.is_empty() {
                    CountField::Missing
                } else if let Ok(i) = s.parse::<i64>() {
                    CountField::Value(i)
                } else {
                    s.parse::<f64>()
                        .ok()
                        .and_then(integral)
                        .map_or(CountField::Invalid, CountField::Value)
                }
            }
            Some(_) => CountField::Invalid,
        }
    }

    pub fn count(&self, key: &str) -> u32 {
        self.count_field(key).coerce()
    }

    /// Parse the snapshot date, accepting `YYYY-MM-DD` with an optional time suffix
    pub fn snapshot_date(&self) -> Option<NaiveDate> {
        let raw = self.text(keys::OCCUPANCY_DATE)?;
        let day = raw.trim().get(..10)?;
        NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}
