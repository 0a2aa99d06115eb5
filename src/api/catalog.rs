use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::USER_AGENT;
use super::retry::{RetryPolicy, get_json};
use crate::config::CatalogConfig;
use crate::domain::RawRecord;
use crate::domain::record::keys;
use crate::error::{Result, ShelterError};

/// Anything that can hand over the latest raw occupancy rows
pub trait CatalogSource {
    fn fetch_records(&self) -> Result<Vec<RawRecord>>;
}

#[derive(Debug, Deserialize)]
struct PackageResponse {
    result: PackageResult,
}

#[derive(Debug, Deserialize)]
struct PackageResult {
    resources: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    #[serde(default)]
    name: Option<String>,
    id: String,
}

#[derive(Debug, Deserialize)]
struct DatastoreResponse {
    result: DatastoreResult,
}

#[derive(Debug, Deserialize)]
struct DatastoreResult {
    records: Vec<Value>,
}

/// Client for the CKAN open-data catalog.
///
/// Two dependent calls: `package_show` to find the occupancy resource id,
/// then `datastore_search` for the newest rows of that resource.
pub struct UpstreamCatalogClient {
    client: Client,
    config: CatalogConfig,
    retry: RetryPolicy,
}

impl UpstreamCatalogClient {
    pub fn new(config: CatalogConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ShelterError::Config(format!("failed to create HTTP client: {}", e)))?;
        let retry = RetryPolicy::new(config.max_attempts);

        Ok(Self {
            client,
            config,
            retry,
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), action)
    }

    /// Look up the id of the occupancy resource inside the dataset package
    pub fn find_resource_id(&self) -> Result<String> {
        let url = self.endpoint("package_show");
        let body = get_json("package_show", &self.retry, || {
            self.client
                .get(&url)
                .query(&[("id", self.config.dataset_id.as_str())])
        })
        .map_err(|e| ShelterError::UpstreamUnavailable(format!("package_show: {}", e)))?;

        parse_package(body, &self.config.resource_name)
    }

    /// Fetch the newest rows of a resource, sorted by snapshot date descending
    pub fn fetch_rows(&self, resource_id: &str) -> Result<Vec<RawRecord>> {
        let url = self.endpoint("datastore_search");
        let sort = format!("{} desc", keys::OCCUPANCY_DATE);
        let limit = self.config.effective_row_limit().to_string();

        let body = get_json("datastore_search", &self.retry, || {
            self.client.get(&url).query(&[
                ("id", resource_id),
                ("sort", sort.as_str()),
                ("limit", limit.as_str()),
            ])
        })
        .map_err(|e| ShelterError::UpstreamUnavailable(format!("datastore_search: {}", e)))?;

        parse_datastore(body)
    }
}

impl CatalogSource for UpstreamCatalogClient {
    fn fetch_records(&self) -> Result<Vec<RawRecord>> {
        let resource_id = self.find_resource_id()?;
        log::debug!("Using occupancy resource {}", resource_id);

        let records = self.fetch_rows(&resource_id)?;
        log::info!("Fetched {} occupancy rows", records.len());
        Ok(records)
    }
}

fn select_resource<'a>(resources: &'a [Resource], name: &str) -> Option<&'a Resource> {
    let wanted = name.to_lowercase();
    resources
        .iter()
        .find(|r| r.name.as_deref().is_some_and(|n| n.to_lowercase() == wanted))
}

/// Unwrap the package envelope and pick the id of the resource called `name`
fn parse_package(body: Value, name: &str) -> Result<String> {
    let package: PackageResponse = serde_json::from_value(body).map_err(|e| {
        ShelterError::UpstreamUnavailable(format!("unexpected package_show schema: {}", e))
    })?;

    select_resource(&package.result.resources, name)
        .map(|r| r.id.clone())
        .ok_or_else(|| {
            ShelterError::UpstreamUnavailable(format!("no resource named '{}' in package", name))
        })
}

/// Unwrap the datastore envelope. Entries that are not JSON objects are skipped.
fn parse_datastore(body: Value) -> Result<Vec<RawRecord>> {
    let response: DatastoreResponse = serde_json::from_value(body).map_err(|e| {
        ShelterError::UpstreamUnavailable(format!("unexpected datastore_search schema: {}", e))
    })?;

    let records = response
        .result
        .records
        .into_iter()
        .filter_map(|value| match value {
            Value::Object(map) => Some(RawRecord::from(map)),
            other => {
                log::warn!("Skipping non-object datastore row: {}", other);
                None
            }
        })
        .collect();

    Ok(records)
}
