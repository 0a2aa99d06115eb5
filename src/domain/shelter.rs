use serde::{Deserialize, Serialize};

use crate::domain::record::keys;
use crate::error::{Result, ShelterError};

/// How a shelter accounts for its capacity.
///
/// Serialized with the catalog's own labels so the dashboard can filter on
/// the same strings it shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapacityType {
    #[serde(rename = "Bed Based Capacity")]
    BedBased,
    #[serde(rename = "Room Based Capacity")]
    RoomBased,
}

impl CapacityType {
    /// Classify a catalog capacity label into a CapacityType
    pub fn from_label(label: &str) -> Option<CapacityType> {
        match label.trim() {
            "Bed Based Capacity" => Some(CapacityType::BedBased),
            "Room Based Capacity" => Some(CapacityType::RoomBased),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CapacityType::BedBased => "Bed Based Capacity",
            CapacityType::RoomBased => "Room Based Capacity",
        }
    }

    /// Row key holding the unoccupied counter for this capacity type
    pub fn unoccupied_key(self) -> &'static str {
        match self {
            CapacityType::BedBased => keys::UNOCCUPIED_BEDS,
            CapacityType::RoomBased => keys::UNOCCUPIED_ROOMS,
        }
    }
}

/// A WGS84 position that is known to be in range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    lat: f64,
    lng: f64,
}

impl Coordinates {
    /// Build coordinates, rejecting non-finite or out-of-range values.
    ///
    /// # Returns
    /// * `Ok(Coordinates)` - If `-90 <= lat <= 90` and `-180 <= lng <= 180`
    /// * `Err(ShelterError::InvalidCoordinates)` - Otherwise
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        let lat_ok = lat.is_finite() && (-90.0..=90.0).contains(&lat);
        let lng_ok = lng.is_finite() && (-180.0..=180.0).contains(&lng);
        if !lat_ok || !lng_ok {
            return Err(ShelterError::InvalidCoordinates { lat, lng });
        }
        Ok(Self { lat, lng })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }
}

/// Lower-case and trim a postal code. Blank input has no postal code.
pub fn normalize_postal_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// A shelter program with open capacity on the snapshot date.
///
/// Counts are unsigned so they can never go negative. Coordinates can only
/// be attached through [`Shelter::annotate`], which takes already validated
/// [`Coordinates`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Shelter {
    pub name: String,
    pub address: String,
    pub postal_code: Option<String>,
    pub sector: String,
    pub capacity_type: CapacityType,
    pub service_type: String,
    pub available_beds: u32,
    pub total_beds: u32,
    pub available_rooms: u32,
    pub total_rooms: u32,
    lat: Option<f64>,
    lng: Option<f64>,
}

impl Shelter {
    pub fn new(name: impl Into<String>, capacity_type: CapacityType) -> Self {
        Self {
            name: name.into(),
            address: String::new(),
            postal_code: None,
            sector: String::new(),
            capacity_type,
            service_type: String::new(),
            available_beds: 0,
            total_beds: 0,
            available_rooms: 0,
            total_rooms: 0,
            lat: None,
            lng: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the postal code, normalized to lower case
    pub fn with_postal_code(mut self, postal_code: Option<&str>) -> Self {
        self.postal_code = postal_code.and_then(normalize_postal_code);
        self
    }

    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = sector.into();
        self
    }

    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = service_type.into();
        self
    }

    pub fn with_beds(mut self, available: u32, total: u32) -> Self {
        self.available_beds = available;
        self.total_beds = total;
        self
    }

    pub fn with_rooms(mut self, available: u32, total: u32) -> Self {
        self.available_rooms = available;
        self.total_rooms = total;
        self
    }

    pub fn annotate(&mut self, coordinates: Coordinates) {
        self.lat = Some(coordinates.lat());
        self.lng = Some(coordinates.lng());
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Coordinates::new(lat, lng).ok(),
            _ => None,
        }
    }
}
