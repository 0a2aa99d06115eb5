use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

use super::USER_AGENT;
use super::retry::{RetryPolicy, get_json};
use crate::config::GeocodingConfig;
use crate::domain::Coordinates;
use crate::error::{Result, ShelterError};

/// Resolves a postal code to a position
pub trait Geocoder {
    fn resolve(&self, postal_code: &str) -> Result<Coordinates>;
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Location,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

/// Google Geocoding API client
pub struct GoogleGeocoder {
    client: Client,
    config: GeocodingConfig,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl GoogleGeocoder {
    /// Build the client. Without an API key every lookup fails, which the
    /// pipeline treats like any other geocoding failure.
    pub fn new(config: GeocodingConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ShelterError::Config(format!("failed to create HTTP client: {}", e)))?;

        let api_key = config.resolved_api_key();
        if api_key.is_none() {
            log::warn!(
                "No geocoding API key configured; only cached postal codes will get coordinates"
            );
        }
        let retry = RetryPolicy::new(config.max_attempts);

        Ok(Self {
            client,
            config,
            api_key,
            retry,
        })
    }
}

impl Geocoder for GoogleGeocoder {
    fn resolve(&self, postal_code: &str) -> Result<Coordinates> {
        let failure = |reason: String| ShelterError::GeocodingFailure {
            postal_code: postal_code.to_string(),
            reason,
        };

        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| failure("no API key configured".to_string()))?;

        let body = get_json("geocode", &self.retry, || {
            let mut query = vec![("address", postal_code), ("key", api_key)];
            if let Some(region) = self.config.region.as_deref() {
                query.push(("region", region));
            }
            self.client.get(&self.config.url).query(&query)
        })
        .map_err(|e| failure(e.to_string()))?;

        parse_response(postal_code, body)
    }
}

/// Take the first result's location from a geocoding response
fn parse_response(postal_code: &str, body: serde_json::Value) -> Result<Coordinates> {
    let failure = |reason: String| ShelterError::GeocodingFailure {
        postal_code: postal_code.to_string(),
        reason,
    };

    let response: GeocodeResponse =
        serde_json::from_value(body).map_err(|e| failure(format!("unexpected response: {}", e)))?;

    match response.status.as_deref() {
        None | Some("OK") => {}
        Some(status) => {
            let detail = response.error_message.unwrap_or_default();
            return Err(failure(format!("status {} {}", status, detail).trim().to_string()));
        }
    }

    let first = response
        .results
        .into_iter()
        .next()
        .ok_or_else(|| failure("no results".to_string()))?;

    let Location { lat, lng } = first.geometry.location;
    Coordinates::new(lat, lng).map_err(|e| failure(e.to_string()))
}
