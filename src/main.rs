use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use std::path::PathBuf;
use std::time::Instant;

use shelterbeds::api::{Geocoder, GoogleGeocoder, UpstreamCatalogClient};
use shelterbeds::cache::GeoCache;
use shelterbeds::config::FileConfig;
use shelterbeds::domain::Coordinates;
use shelterbeds::proximity::sort_by_distance;
use shelterbeds::{AvailabilityPipeline, seed, server};

type LivePipeline = AvailabilityPipeline<UpstreamCatalogClient, GoogleGeocoder>;

/// Find Toronto shelters with open beds or rooms
///
/// Examples:
///   # Print today's availability as JSON
///   shelterbeds
///
///   # Closest shelters to a postal code first
///   shelterbeds fetch --near "M5V 2T6" --pretty
///
///   # Serve /api/shelters for the dashboard
///   shelterbeds serve --port 5000
///
///   # Pre-fill the postal code cache from a bulk address file
///   shelterbeds seed postal_codes.csv
#[derive(Parser, Debug)]
#[command(name = "shelterbeds")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to config file (optional, auto-searches shelterbeds.toml if not provided)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Postal code cache file (defaults to static/gta_postal_codes.json)
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the latest snapshot and print it as JSON (default)
    Fetch {
        /// Sort shelters by distance from this postal code
        #[arg(long)]
        near: Option<String>,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Serve the availability API over HTTP
    Serve {
        /// Address to bind (overrides config and BIND_ADDR)
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on (overrides config and PORT)
        #[arg(short = 'p', long)]
        port: Option<u16>,
    },

    /// Seed the postal code cache from a CSV with CITY, POSTAL_CODE, LATITUDE, LONGITUDE columns
    Seed {
        /// Bulk address CSV file
        csv: PathBuf,

        /// Comma-separated cities to keep (defaults to the Greater Toronto Area)
        #[arg(long, value_delimiter = ',')]
        cities: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    let file_config = if let Some(ref config_path) = args.config {
        FileConfig::from_path(config_path).context("Failed to load config file")?
    } else {
        FileConfig::load().unwrap_or_default()
    };

    let cache_path = args.cache.clone().unwrap_or_else(|| file_config.cache_path());
    log::debug!("Postal code cache: {}", cache_path.display());

    match args.command.unwrap_or(Command::Fetch {
        near: None,
        pretty: false,
    }) {
        Command::Fetch { near, pretty } => {
            let pipeline = build_pipeline(&file_config, cache_path)?;
            fetch(&pipeline, near.as_deref(), pretty)
        }
        Command::Serve { bind, port } => {
            let pipeline = build_pipeline(&file_config, cache_path)?;
            let mut server_config = file_config.server();
            if let Some(bind) = bind {
                server_config.bind = bind;
            }
            if let Some(port) = port {
                server_config.port = port;
            }

            actix_web::rt::System::new()
                .block_on(server::run(pipeline, &server_config))
                .context("Server failed")
        }
        Command::Seed { csv, cities } => {
            let cities = if cities.is_empty() {
                file_config.seed().cities
            } else {
                cities
            };
            let cache = GeoCache::new(cache_path);

            let spinner = create_spinner("Seeding postal code cache...");
            let start = Instant::now();
            let stats = seed::seed_cache(&csv, &cities, &cache)
                .with_context(|| format!("Failed to seed cache from {}", csv.display()))?;
            spinner.finish_with_message(format!(
                "Seeded {} postal codes from {} rows, cache now holds {} [{:.1}s]",
                stats.postal_codes,
                stats.rows,
                stats.written,
                start.elapsed().as_secs_f32()
            ));
            Ok(())
        }
    }
}

fn init_logger(verbose: bool) {
    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn build_pipeline(file_config: &FileConfig, cache_path: PathBuf) -> Result<LivePipeline> {
    let catalog = UpstreamCatalogClient::new(file_config.catalog())
        .context("Failed to create catalog client")?;
    let geocoder =
        GoogleGeocoder::new(file_config.geocoding()).context("Failed to create geocoder")?;
    Ok(AvailabilityPipeline::new(
        catalog,
        geocoder,
        GeoCache::new(cache_path),
    ))
}

fn fetch(pipeline: &LivePipeline, near: Option<&str>, pretty: bool) -> Result<()> {
    let spinner = create_spinner("Fetching shelter occupancy...");
    let start = Instant::now();
    let mut response = pipeline
        .run_response()
        .context("Failed to fetch shelter availability")?;
    spinner.finish_and_clear();
    log::info!(
        "Found {} shelters with space [{:.1}s]",
        response.shelter_availabilities.len(),
        start.elapsed().as_secs_f32()
    );

    if let Some(postal_code) = near {
        let origin = locate(pipeline, postal_code)?;
        sort_by_distance(&mut response.shelter_availabilities, origin);
    }

    let json = if pretty {
        serde_json::to_string_pretty(&response)
    } else {
        serde_json::to_string(&response)
    }
    .context("Failed to serialize response")?;
    println!("{}", json);

    Ok(())
}

/// Coordinates for a reference postal code, from the cache if possible
fn locate(pipeline: &LivePipeline, postal_code: &str) -> Result<Coordinates> {
    if postal_code.trim().is_empty() {
        bail!("--near requires a postal code");
    }
    if let Some(coords) = pipeline.cache().load().lookup(postal_code) {
        return Ok(coords);
    }
    pipeline
        .geocoder()
        .resolve(&postal_code.trim().to_lowercase())
        .with_context(|| format!("Failed to locate postal code {}", postal_code))
}

fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}
