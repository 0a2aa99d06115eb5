//! shelterbeds - Find shelters with open beds or rooms from the daily occupancy open data

pub mod api;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod occupancy;
pub mod pipeline;
pub mod proximity;
pub mod seed;
pub mod server;

pub use error::{Result, ShelterError};
pub use pipeline::{AvailabilityPipeline, AvailabilityResponse};
