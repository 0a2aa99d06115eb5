use chrono::NaiveDate;
use std::collections::BTreeMap;

use super::normalizer::DatedShelter;
use crate::domain::Shelter;

/// Keep only the shelters from the most recent snapshot date present.
///
/// The fetch window is bounded, so the newest date is whatever shows up in
/// the rows, not necessarily today. Dates compare in calendar order and
/// rows keep their input order within the chosen date.
pub fn select_latest(shelters: Vec<DatedShelter>) -> (Option<NaiveDate>, Vec<Shelter>) {
    let mut by_date: BTreeMap<NaiveDate, Vec<Shelter>> = BTreeMap::new();
    for DatedShelter { date, shelter } in shelters {
        by_date.entry(date).or_default().push(shelter);
    }

    match by_date.pop_last() {
        Some((date, latest)) => {
            log::debug!(
                "Selected snapshot {} with {} shelters ({} older dates ignored)",
                date,
                latest.len(),
                by_date.len()
            );
            (Some(date), latest)
        }
        None => (None, Vec::new()),
    }
}
