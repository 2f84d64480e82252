use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use uuid::Uuid;

use crate::entities::{driver, passenger, trip, trip::TripStatus};
use crate::error::{AppError, AppResult};
use crate::services::legacy_coordinates;
use crate::utils::geo::{is_within_radius, GeoPoint};

/// Anything the matcher can rank by distance.
pub trait Locatable {
    fn location(&self) -> Option<GeoPoint>;

    fn vehicle_class(&self) -> Option<&str> {
        None
    }
}

impl Locatable for driver::Model {
    fn location(&self) -> Option<GeoPoint> {
        GeoPoint::from_parts(self.last_lat, self.last_lon)
    }

    fn vehicle_class(&self) -> Option<&str> {
        Some(&self.vehicle_class)
    }
}

impl Locatable for passenger::Model {
    fn location(&self) -> Option<GeoPoint> {
        GeoPoint::from_parts(self.last_lat, self.last_lon)
    }
}

/// Open trips are located at their pickup.
impl Locatable for trip::Model {
    fn location(&self) -> Option<GeoPoint> {
        GeoPoint::from_parts(Some(self.pickup_lat), Some(self.pickup_lon))
    }

    fn vehicle_class(&self) -> Option<&str> {
        Some(&self.vehicle_class)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Match<T> {
    #[serde(flatten)]
    pub entity: T,
    pub distance_km: f64,
}

pub fn validate_query(radius_km: f64, limit: usize) -> AppResult<()> {
    if !radius_km.is_finite() || radius_km < 0.0 {
        return Err(AppError::Validation(
            "Radius must be a non-negative number".to_string(),
        ));
    }
    if limit == 0 {
        return Err(AppError::Validation("Limit must be at least 1".to_string()));
    }
    Ok(())
}

pub(crate) fn class_matches<T: Locatable>(entity: &T, class_filter: Option<&str>) -> bool {
    match class_filter {
        None => true,
        Some(wanted) => entity
            .vehicle_class()
            .is_some_and(|class| class.eq_ignore_ascii_case(wanted.trim())),
    }
}

/// Candidates within `radius_km` of `origin`, nearest first, at most `limit`.
/// Entities without a location never match; equal distances keep input order.
pub fn find<T: Locatable>(
    candidates: Vec<T>,
    origin: &GeoPoint,
    radius_km: f64,
    class_filter: Option<&str>,
    limit: usize,
) -> AppResult<Vec<Match<T>>> {
    validate_query(radius_km, limit)?;
    let origin = GeoPoint::new(origin.lat, origin.lon)?;

    let mut matches: Vec<Match<T>> = candidates
        .into_iter()
        .filter(|c| class_matches(c, class_filter))
        .filter_map(|entity| {
            let point = entity.location()?;
            let distance_km = point.distance_km(&origin);
            is_within_radius(&point, &origin, radius_km).then_some(Match {
                entity,
                distance_km,
            })
        })
        .collect();

    // sort_by is stable
    matches.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    matches.truncate(limit);
    Ok(matches)
}

// ============ Database-backed searches ============

/// Available drivers that have reported a location.
pub async fn available_drivers<C: ConnectionTrait>(
    db: &C,
    exclude: &[Uuid],
) -> AppResult<Vec<driver::Model>> {
    let mut query = driver::Entity::find()
        .filter(driver::Column::Available.eq(true))
        .filter(driver::Column::LastLat.is_not_null())
        .filter(driver::Column::LastLon.is_not_null());
    if !exclude.is_empty() {
        query = query.filter(driver::Column::Id.is_not_in(exclude.iter().copied()));
    }
    Ok(query.order_by_asc(driver::Column::CreatedAt).all(db).await?)
}

pub async fn located_passengers<C: ConnectionTrait>(
    db: &C,
    exclude: &[Uuid],
) -> AppResult<Vec<passenger::Model>> {
    let mut query = passenger::Entity::find()
        .filter(passenger::Column::LastLat.is_not_null())
        .filter(passenger::Column::LastLon.is_not_null());
    if !exclude.is_empty() {
        query = query.filter(passenger::Column::Id.is_not_in(exclude.iter().copied()));
    }
    Ok(query.order_by_asc(passenger::Column::CreatedAt).all(db).await?)
}

pub async fn open_trips<C: ConnectionTrait>(db: &C) -> AppResult<Vec<trip::Model>> {
    Ok(trip::Entity::find()
        .filter(trip::Column::Status.eq(TripStatus::Requested))
        .filter(trip::Column::DriverId.is_null())
        .order_by_asc(trip::Column::CreatedAt)
        .all(db)
        .await?)
}

/// Driver search around raw client coordinates.
#[derive(Debug, Clone, Copy)]
pub struct DriverSearch<'a> {
    pub lat: f64,
    pub lon: f64,
    pub radius_km: f64,
    pub class_filter: Option<&'a str>,
    pub limit: usize,
    pub exclude: &'a [Uuid],
    /// Reinterpret an origin that a client swapped or mis-signed.
    pub correct_origin: bool,
}

pub async fn nearby_drivers<C: ConnectionTrait>(
    db: &C,
    search: DriverSearch<'_>,
) -> AppResult<Vec<Match<driver::Model>>> {
    validate_query(search.radius_km, search.limit)?;
    let drivers = available_drivers(db, search.exclude).await?;

    let origin = if search.correct_origin {
        legacy_coordinates::resolve_origin(
            search.lat,
            search.lon,
            &drivers,
            search.radius_km,
            search.class_filter,
        )?
        .origin
    } else {
        GeoPoint::new(search.lat, search.lon)?
    };

    find(drivers, &origin, search.radius_km, search.class_filter, search.limit)
}

pub async fn nearby_passengers<C: ConnectionTrait>(
    db: &C,
    origin: &GeoPoint,
    radius_km: f64,
    limit: usize,
    exclude: &[Uuid],
) -> AppResult<Vec<Match<passenger::Model>>> {
    validate_query(radius_km, limit)?;
    let passengers = located_passengers(db, exclude).await?;
    find(passengers, origin, radius_km, None, limit)
}

pub async fn nearby_open_trips<C: ConnectionTrait>(
    db: &C,
    origin: &GeoPoint,
    radius_km: f64,
    class_filter: Option<&str>,
    limit: usize,
) -> AppResult<Vec<Match<trip::Model>>> {
    validate_query(radius_km, limit)?;
    let trips = open_trips(db).await?;
    find(trips, origin, radius_km, class_filter, limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Car {
        name: &'static str,
        at: Option<GeoPoint>,
        class: &'static str,
    }

    impl Locatable for Car {
        fn location(&self) -> Option<GeoPoint> {
            self.at
        }

        fn vehicle_class(&self) -> Option<&str> {
            Some(self.class)
        }
    }

    fn car(name: &'static str, lat: f64, lon: f64, class: &'static str) -> Car {
        Car {
            name,
            at: Some(GeoPoint::new(lat, lon).unwrap()),
            class,
        }
    }

    fn origin() -> GeoPoint {
        GeoPoint::new(9.03, 38.74).unwrap()
    }

    #[test]
    fn test_orders_by_distance_and_respects_radius() {
        let cars = vec![
            car("far", 9.30, 38.74, "mini"),
            car("mid", 9.05, 38.74, "mini"),
            car("near", 9.031, 38.74, "mini"),
        ];

        let found = find(cars, &origin(), 5.0, None, 10).unwrap();
        let names: Vec<_> = found.iter().map(|m| m.entity.name).collect();
        assert_eq!(names, vec!["near", "mid"]);
        assert!(found.iter().all(|m| m.distance_km <= 5.0));
    }

    #[test]
    fn test_limit_truncates() {
        let cars = vec![
            car("a", 9.031, 38.74, "mini"),
            car("b", 9.032, 38.74, "mini"),
            car("c", 9.033, 38.74, "mini"),
        ];
        let found = find(cars, &origin(), 5.0, None, 2).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].entity.name, "b");
    }

    #[test]
    fn test_class_filter_is_case_insensitive() {
        let cars = vec![car("x", 9.031, 38.74, "Mini"), car("y", 9.031, 38.74, "suv")];
        let found = find(cars, &origin(), 5.0, Some("MINI"), 5).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity.name, "x");
    }

    #[test]
    fn test_missing_location_is_excluded() {
        let cars = vec![Car {
            name: "ghost",
            at: None,
            class: "mini",
        }];
        assert!(find(cars, &origin(), 100.0, None, 5).unwrap().is_empty());
    }

    #[test]
    fn test_ties_keep_input_order() {
        let cars = vec![car("first", 9.04, 38.74, "mini"), car("second", 9.04, 38.74, "mini")];
        let found = find(cars, &origin(), 5.0, None, 5).unwrap();
        assert_eq!(found[0].entity.name, "first");
        assert_eq!(found[1].entity.name, "second");
    }

    #[test]
    fn test_rejects_bad_query() {
        assert!(find(Vec::<Car>::new(), &origin(), -1.0, None, 5).is_err());
        assert!(find(Vec::<Car>::new(), &origin(), f64::NAN, None, 5).is_err());
        assert!(find(Vec::<Car>::new(), &origin(), 5.0, None, 0).is_err());

        let off_map = GeoPoint { lat: 120.0, lon: 38.74 };
        assert!(matches!(
            find(Vec::<Car>::new(), &off_map, 5.0, None, 5),
            Err(AppError::Validation(_))
        ));
    }
}
