use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A validated WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> AppResult<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(AppError::Validation(
                "Valid latitude and longitude are required".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(AppError::Validation(format!(
                "Coordinates out of range: ({}, {})",
                lat, lon
            )));
        }
        Ok(Self { lat, lon })
    }

    /// Builds a point from optional stored columns; rows without a full
    /// location yield `None`.
    pub fn from_parts(lat: Option<f64>, lon: Option<f64>) -> Option<Self> {
        match (lat, lon) {
            (Some(lat), Some(lon)) => Self::new(lat, lon).ok(),
            _ => None,
        }
    }

    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_distance(self.lat, self.lon, other.lat, other.lon)
    }
}

/// Calculate distance between two coordinates using Haversine formula
/// Returns distance in kilometers
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * c
}

/// Check if a point is within the given radius of a center
pub fn is_within_radius(point: &GeoPoint, center: &GeoPoint, max_radius_km: f64) -> bool {
    point.distance_km(center) <= max_radius_km
}

/// Length of a sampled path, summing consecutive legs.
pub fn path_distance_km(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|leg| leg[0].distance_km(&leg[1]))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_addis_short_hop() {
        let from = GeoPoint::new(9.03, 38.74).unwrap();
        let to = GeoPoint::new(9.05, 38.76).unwrap();

        let distance = from.distance_km(&to);
        // Roughly 2.2 km north plus 2.2 km east
        assert!(distance > 3.0 && distance < 3.25, "got {}", distance);
    }

    #[test]
    fn test_haversine_is_symmetric_and_zero_on_self() {
        let a = GeoPoint::new(-6.2088, 106.8456).unwrap();
        let b = GeoPoint::new(-6.9175, 107.6191).unwrap();

        assert!((a.distance_km(&b) - b.distance_km(&a)).abs() < 1e-9);
        assert_eq!(a.distance_km(&a), 0.0);
    }

    #[test]
    fn test_within_radius() {
        let center = GeoPoint::new(-6.2088, 106.8456).unwrap();
        let nearby = GeoPoint::new(-6.21, 106.85).unwrap();
        let far = GeoPoint::new(-6.9175, 107.6191).unwrap();

        assert!(is_within_radius(&nearby, &center, 10.0));
        assert!(!is_within_radius(&far, &center, 10.0));
    }

    #[test]
    fn test_rejects_invalid_coordinates() {
        assert!(GeoPoint::new(f64::NAN, 10.0).is_err());
        assert!(GeoPoint::new(10.0, f64::INFINITY).is_err());
        assert!(GeoPoint::new(91.0, 10.0).is_err());
        assert!(GeoPoint::new(10.0, -181.0).is_err());
    }

    #[test]
    fn test_from_parts_requires_both_columns() {
        assert!(GeoPoint::from_parts(Some(9.0), None).is_none());
        assert!(GeoPoint::from_parts(None, None).is_none());
        assert!(GeoPoint::from_parts(Some(9.0), Some(38.0)).is_some());
    }

    #[test]
    fn test_path_distance_sums_legs() {
        let a = GeoPoint::new(9.00, 38.70).unwrap();
        let b = GeoPoint::new(9.01, 38.70).unwrap();
        let c = GeoPoint::new(9.02, 38.70).unwrap();

        let total = path_distance_km(&[a, b, c]);
        assert!((total - a.distance_km(&c)).abs() < 1e-6);
        assert_eq!(path_distance_km(&[a]), 0.0);
    }
}
