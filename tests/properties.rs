use proptest::prelude::*;

use ride_dispatch::services::fare::{self, Tariff};
use ride_dispatch::services::matcher::{self, Locatable};
use ride_dispatch::utils::geo::GeoPoint;

#[derive(Debug, Clone)]
struct Spot {
    id: usize,
    point: Option<GeoPoint>,
}

impl Locatable for Spot {
    fn location(&self) -> Option<GeoPoint> {
        self.point
    }
}

fn origin() -> GeoPoint {
    GeoPoint { lat: 9.03, lon: 38.74 }
}

fn spots() -> impl Strategy<Value = Vec<Spot>> {
    prop::collection::vec(
        prop::option::weighted(0.9, (-0.2f64..0.2, -0.2f64..0.2)),
        0..40,
    )
    .prop_map(|offsets| {
        offsets
            .into_iter()
            .enumerate()
            .map(|(id, offset)| Spot {
                id,
                point: offset.map(|(dlat, dlon)| GeoPoint {
                    lat: 9.03 + dlat,
                    lon: 38.74 + dlon,
                }),
            })
            .collect()
    })
}

fn tariffs() -> impl Strategy<Value = Tariff> {
    (0.0f64..20.0, 0.0f64..10.0, 0.5f64..3.0).prop_map(|(base_fare, per_km, surge_multiplier)| Tariff {
        base_fare,
        per_km,
        per_minute: 0.0,
        waiting_per_minute: 0.0,
        surge_multiplier,
    })
}

proptest! {
    #[test]
    fn matches_stay_within_radius(candidates in spots(), radius in 0.0f64..30.0, limit in 1usize..50) {
        let found = matcher::find(candidates, &origin(), radius, None, limit).unwrap();
        for m in &found {
            prop_assert!(m.distance_km <= radius);
            prop_assert!(m.entity.point.is_some());
        }
    }

    #[test]
    fn matches_respect_limit_and_order(candidates in spots(), radius in 0.0f64..30.0, limit in 1usize..50) {
        let in_radius = candidates
            .iter()
            .filter(|c| c.point.is_some_and(|p| p.distance_km(&origin()) <= radius))
            .count();
        let found = matcher::find(candidates, &origin(), radius, None, limit).unwrap();

        prop_assert_eq!(found.len(), in_radius.min(limit));
        for pair in found.windows(2) {
            prop_assert!(pair[0].distance_km <= pair[1].distance_km);
            if pair[0].distance_km == pair[1].distance_km {
                prop_assert!(pair[0].entity.id < pair[1].entity.id);
            }
        }
    }

    #[test]
    fn fare_is_monotonic_in_distance(tariff in tariffs(), a in 0.0f64..200.0, b in 0.0f64..200.0) {
        let (near, far) = if a <= b { (a, b) } else { (b, a) };
        let near_fare = fare::price_distance(&tariff, near).fare_estimated;
        let far_fare = fare::price_distance(&tariff, far).fare_estimated;
        prop_assert!(near_fare <= far_fare, "{} > {}", near_fare, far_fare);
    }

    #[test]
    fn estimate_is_pure(tariff in tariffs(), dlat in -0.5f64..0.5, dlon in -0.5f64..0.5) {
        let dropoff = GeoPoint { lat: 9.03 + dlat, lon: 38.74 + dlon };
        let first = fare::estimate_with(&tariff, &origin(), &dropoff);
        let second = fare::estimate_with(&tariff, &origin(), &dropoff);
        prop_assert_eq!(first, second);
        prop_assert!(first.fare_estimated >= 0.0);
    }
}
