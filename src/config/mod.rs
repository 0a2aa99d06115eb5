use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, ShelterError};

pub const API_KEY_ENV: &str = "GOOGLE_MAPS_API_KEY";

/// Upper bound on rows requested from the datastore per fetch
pub const MAX_ROW_LIMIT: u32 = 500;

fn default_cache_path() -> PathBuf {
    PathBuf::from("static").join("gta_postal_codes.json")
}

#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    #[serde(default)]
    pub catalog: Option<CatalogConfig>,
    #[serde(default)]
    pub geocoding: Option<GeocodingConfig>,
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub seed: Option<SeedConfig>,
}

fn default_catalog_url() -> String {
    "https://ckan0.cf.opendata.inter.prod-toronto.ca/api/3/action".to_string()
}

fn default_dataset_id() -> String {
    "daily-shelter-overnight-service-occupancy-capacity".to_string()
}

fn default_resource_name() -> String {
    "daily shelter overnight occupancy".to_string()
}

fn default_row_limit() -> u32 {
    MAX_ROW_LIMIT
}

fn default_catalog_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    2
}

/// Where and how to read the daily occupancy dataset
#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_url")]
    pub base_url: String,
    #[serde(default = "default_dataset_id")]
    pub dataset_id: String,
    #[serde(default = "default_resource_name")]
    pub resource_name: String,
    #[serde(default = "default_row_limit")]
    pub row_limit: u32,
    #[serde(default = "default_catalog_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl CatalogConfig {
    /// Configured row limit, kept within 1..=MAX_ROW_LIMIT
    pub fn effective_row_limit(&self) -> u32 {
        if self.row_limit > MAX_ROW_LIMIT {
            log::warn!(
                "row_limit {} exceeds {}, clamping",
                self.row_limit,
                MAX_ROW_LIMIT
            );
        }
        self.row_limit.clamp(1, MAX_ROW_LIMIT)
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_catalog_url(),
            dataset_id: default_dataset_id(),
            resource_name: default_resource_name(),
            row_limit: default_row_limit(),
            timeout_secs: default_catalog_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_geocoding_url() -> String {
    "https://maps.googleapis.com/maps/api/geocode/json".to_string()
}

fn default_region() -> Option<String> {
    Some("ca".to_string())
}

fn default_geocoding_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeocodingConfig {
    #[serde(default = "default_geocoding_url")]
    pub url: String,
    /// Falls back to the GOOGLE_MAPS_API_KEY environment variable
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_region")]
    pub region: Option<String>,
    #[serde(default = "default_geocoding_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            url: default_geocoding_url(),
            api_key: None,
            region: default_region(),
            timeout_secs: default_geocoding_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl GeocodingConfig {
    /// Key from the config file, else from the environment
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

/// `[server]` as written in the file; unset fields come from the environment
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerSection {
    #[serde(default)]
    pub bind: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

fn default_seed_cities() -> Vec<String> {
    [
        "toronto",
        "mississauga",
        "brampton",
        "markham",
        "vaughan",
        "richmond hill",
        "oakville",
        "burlington",
        "oshawa",
        "pickering",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

/// Cities kept when seeding the postal code cache from a bulk address file
#[derive(Debug, Deserialize, Clone)]
pub struct SeedConfig {
    #[serde(default = "default_seed_cities")]
    pub cities: Vec<String>,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            cities: default_seed_cities(),
        }
    }
}

impl FileConfig {
    /// Search the usual locations and return the first config that parses
    pub fn load() -> Option<Self> {
        let config_paths = get_config_paths();

        for path in config_paths {
            if path.exists()
                && let Ok(contents) = std::fs::read_to_string(&path)
            {
                match toml::from_str(&contents) {
                    Ok(config) => {
                        log::debug!("Loaded config from {}", path.display());
                        return Some(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to parse config file {}: {}", path.display(), e);
                    }
                }
            }
        }
        None
    }

    /// Load an explicitly requested config file. Missing or invalid files are errors.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ShelterError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ShelterError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&contents)
            .map_err(|e| ShelterError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_path.clone().unwrap_or_else(default_cache_path)
    }

    pub fn catalog(&self) -> CatalogConfig {
        self.catalog.clone().unwrap_or_default()
    }

    pub fn geocoding(&self) -> GeocodingConfig {
        self.geocoding.clone().unwrap_or_default()
    }

    /// Server settings. BIND_ADDR and PORT fill any field the file leaves unset.
    pub fn server(&self) -> ServerConfig {
        resolve_server(self.server.as_ref(), |name| std::env::var(name).ok())
    }

    pub fn seed(&self) -> SeedConfig {
        self.seed.clone().unwrap_or_default()
    }
}

fn resolve_server<F>(section: Option<&ServerSection>, env: F) -> ServerConfig
where
    F: Fn(&str) -> Option<String>,
{
    let section = section.cloned().unwrap_or_default();
    let bind = section
        .bind
        .or_else(|| env("BIND_ADDR").filter(|b| !b.trim().is_empty()))
        .unwrap_or_else(default_bind);
    let port = section
        .port
        .or_else(|| env("PORT").and_then(|p| p.trim().parse().ok()))
        .unwrap_or_else(default_port);
    ServerConfig { bind, port }
}

fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("shelterbeds.toml"));
    paths.push(PathBuf::from(".shelterbeds.toml"));

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("shelterbeds").join("config.toml"));
        paths.push(config_dir.join("shelterbeds.toml"));
    }

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".shelterbeds.toml"));
    }

    paths
}
