pub mod catalog;
pub mod geocoding;
pub mod retry;

pub use catalog::{CatalogSource, UpstreamCatalogClient};
pub use geocoding::{Geocoder, GoogleGeocoder};
pub use retry::{FetchError, RetryPolicy};

pub(crate) const USER_AGENT: &str = concat!("shelterbeds/", env!("CARGO_PKG_VERSION"));
