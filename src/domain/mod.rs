pub mod record;
pub mod shelter;

pub use record::{CountField, RawRecord};
pub use shelter::{CapacityType, Coordinates, Shelter, normalize_postal_code};
