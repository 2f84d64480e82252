//! Origin correction for clients that send coordinates swapped or with the
//! wrong longitude sign. The origin is tried under each reinterpretation and
//! the one that best agrees with the candidate set wins.

use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::services::matcher::{class_matches, Locatable};
use crate::utils::geo::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpretation {
    AsGiven,
    Swapped,
    SignCorrected,
    SwappedSignCorrected,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub interpretation: Interpretation,
    pub origin: GeoPoint,
    pub in_radius: usize,
}

/// Majority sign of the candidates' longitudes; ties and empty sets are negative.
fn expected_lon_sign<T: Locatable>(candidates: &[T]) -> f64 {
    let (positive, negative) = candidates
        .iter()
        .filter_map(Locatable::location)
        .fold((0usize, 0usize), |(pos, neg), p| {
            if p.lon > 0.0 {
                (pos + 1, neg)
            } else if p.lon < 0.0 {
                (pos, neg + 1)
            } else {
                (pos, neg)
            }
        });

    if positive > negative { 1.0 } else { -1.0 }
}

fn interpretations(lat: f64, lon: f64, sign: f64) -> [(Interpretation, f64, f64); 4] {
    [
        (Interpretation::AsGiven, lat, lon),
        (Interpretation::Swapped, lon, lat),
        (Interpretation::SignCorrected, lat, lon.abs() * sign),
        (Interpretation::SwappedSignCorrected, lon, lat.abs() * sign),
    ]
}

/// Count and mean distance of class-matching candidates inside the radius.
fn score<T: Locatable>(
    origin: &GeoPoint,
    candidates: &[T],
    radius_km: f64,
    class_filter: Option<&str>,
) -> (usize, f64) {
    let distances: Vec<f64> = candidates
        .iter()
        .filter(|c| class_matches(*c, class_filter))
        .filter_map(|c| c.location())
        .map(|p| p.distance_km(origin))
        .filter(|d| *d <= radius_km)
        .collect();

    if distances.is_empty() {
        return (0, f64::INFINITY);
    }
    let mean = distances.iter().sum::<f64>() / distances.len() as f64;
    (distances.len(), mean)
}

pub fn resolve_origin<T: Locatable>(
    lat: f64,
    lon: f64,
    candidates: &[T],
    radius_km: f64,
    class_filter: Option<&str>,
) -> AppResult<Resolution> {
    let sign = expected_lon_sign(candidates);
    let mut best: Option<(Resolution, f64)> = None;

    for (interpretation, lat, lon) in interpretations(lat, lon, sign) {
        let Ok(origin) = GeoPoint::new(lat, lon) else {
            continue;
        };
        let (in_radius, mean) = score(&origin, candidates, radius_km, class_filter);

        let better = match &best {
            None => true,
            Some((current, current_mean)) => {
                in_radius > current.in_radius
                    || (in_radius == current.in_radius && mean < *current_mean)
            }
        };
        if better {
            best = Some((
                Resolution {
                    interpretation,
                    origin,
                    in_radius,
                },
                mean,
            ));
        }
    }

    let (resolution, _) = best.ok_or_else(|| {
        AppError::Validation("Valid latitude and longitude are required".to_string())
    })?;

    if resolution.interpretation != Interpretation::AsGiven {
        tracing::warn!(
            given_lat = lat,
            given_lon = lon,
            corrected_lat = resolution.origin.lat,
            corrected_lon = resolution.origin.lon,
            interpretation = ?resolution.interpretation,
            matches = resolution.in_radius,
            "Search origin reinterpreted"
        );
    }

    Ok(resolution)
}
