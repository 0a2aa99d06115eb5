use thiserror::Error;

/// Failures raised while building the shelter availability list.
///
/// Only [`ShelterError::UpstreamUnavailable`] escapes a pipeline run. The
/// other kinds are recovered where they happen and logged.
#[derive(Debug, Error)]
pub enum ShelterError {
    /// The open-data catalog could not be reached or answered with an
    /// unexpected shape.
    #[error("upstream catalog unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A row or field did not have the expected shape.
    #[error("unexpected API response schema: {0}")]
    SchemaAnomaly(String),

    /// The geocoding service failed for a single postal code.
    #[error("geocoding failed for {postal_code}: {reason}")]
    GeocodingFailure { postal_code: String, reason: String },

    /// The postal code cache could not be written.
    #[error("failed to persist postal code cache: {0}")]
    CachePersistFailure(String),

    #[error("coordinates out of range: lat={lat}, lng={lng}")]
    InvalidCoordinates { lat: f64, lng: f64 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to seed postal code cache: {0}")]
    Seed(String),
}

pub type Result<T> = std::result::Result<T, ShelterError>;
