use geo::{Distance, Haversine, Point};
use std::cmp::Ordering;

use crate::domain::{Coordinates, Shelter};

/// Great-circle distance in meters
pub fn distance_m(from: Coordinates, to: Coordinates) -> f64 {
    let a = Point::new(from.lng(), from.lat());
    let b = Point::new(to.lng(), to.lat());
    Haversine::distance(a, b)
}

/// Order shelters nearest-first from `origin`. Shelters without
/// coordinates keep their relative order at the end.
pub fn sort_by_distance(shelters: &mut [Shelter], origin: Coordinates) {
    shelters.sort_by(|a, b| {
        let da = a.coordinates().map(|c| distance_m(origin, c));
        let db = b.coordinates().map(|c| distance_m(origin, c));
        match (da, db) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
}
