pub mod date_selector;
pub mod normalizer;

pub use date_selector::select_latest;
pub use normalizer::{DatedShelter, NormalizeStats, normalize_records};
