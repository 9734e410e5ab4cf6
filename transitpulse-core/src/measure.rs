//! Great-circle distances and time conversions shared by the loader, store and impact engine

use geo::{Closest, ClosestPoint, Distance, Haversine, Line, Point};

use crate::{Error, Weight};

/// Great-circle distance between two points in kilometres
pub fn haversine_km(a: Point<f64>, b: Point<f64>) -> f64 {
    Haversine.distance(a, b) / 1000.0
}

/// Great-circle distance from `point` to the closest point of the segment `from`-`to`.
///
/// The closest point is found in planar lon/lat space, which is accurate enough
/// for the short segments between consecutive stops.
pub fn segment_distance_km(point: Point<f64>, from: Point<f64>, to: Point<f64>) -> f64 {
    let line = Line::new(from, to);
    match line.closest_point(&point) {
        Closest::Intersection(p) | Closest::SinglePoint(p) => haversine_km(point, p),
        Closest::Indeterminate => haversine_km(point, from).min(haversine_km(point, to)),
    }
}

/// Converts a distance at a constant speed into seconds
pub fn travel_time_seconds(distance_km: f64, speed_kmh: f64) -> Result<Weight, Error> {
    if !(speed_kmh > 0.0) || !speed_kmh.is_finite() {
        return Err(Error::InvalidArgument(format!(
            "speed must be strictly positive, got {speed_kmh} km/h"
        )));
    }
    Ok(distance_km / speed_kmh * 3600.0)
}

/// Validates WGS84 decimal degrees and returns them as a point
pub fn checked_point(latitude: f64, longitude: f64) -> Result<Point<f64>, Error> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(Error::InvalidArgument(format!(
            "coordinates out of range: latitude {latitude}, longitude {longitude}"
        )));
    }
    Ok(Point::new(longitude, latitude))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = haversine_km(Point::new(19.0, 50.0), Point::new(19.0, 51.0));
        assert_relative_eq!(d, 111.2, epsilon = 0.3);
    }

    #[test]
    fn midpoint_of_segment_is_on_it() {
        let from = Point::new(19.90, 50.06);
        let to = Point::new(19.92, 50.06);
        let mid = Point::new(19.91, 50.06);
        assert!(segment_distance_km(mid, from, to) < 1e-6);
    }

    #[test]
    fn distance_to_segment_is_never_above_endpoint_distance() {
        let from = Point::new(19.90, 50.06);
        let to = Point::new(19.92, 50.06);
        let query = Point::new(19.91, 50.07);
        let to_segment = segment_distance_km(query, from, to);
        assert!(to_segment <= haversine_km(query, from));
        assert_relative_eq!(to_segment, 1.11, epsilon = 0.02);
    }

    #[test]
    fn travel_time_converts_to_seconds() {
        assert_relative_eq!(travel_time_seconds(5.0, 5.0).unwrap(), 3600.0);
        assert_relative_eq!(travel_time_seconds(0.5, 30.0).unwrap(), 60.0);
    }

    #[test]
    fn non_positive_speed_is_rejected() {
        assert!(matches!(travel_time_seconds(1.0, 0.0), Err(Error::InvalidArgument(_))));
        assert!(matches!(travel_time_seconds(1.0, -3.0), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            travel_time_seconds(1.0, f64::NAN),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn coordinates_are_range_checked() {
        assert!(checked_point(50.0, 19.0).is_ok());
        assert!(checked_point(91.0, 19.0).is_err());
        assert!(checked_point(50.0, -181.0).is_err());
        assert!(checked_point(f64::NAN, 0.0).is_err());
    }
}
