use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};

use crate::entities::tariff;
use crate::error::{AppError, AppResult};
use crate::utils::geo::GeoPoint;
use crate::utils::money::round_money;
use crate::utils::time;

pub const DEFAULT_VEHICLE_CLASS: &str = "mini";

/// Pricing parameters for one vehicle class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tariff {
    pub base_fare: f64,
    pub per_km: f64,
    pub per_minute: f64,
    pub waiting_per_minute: f64,
    pub surge_multiplier: f64,
}

impl Default for Tariff {
    fn default() -> Self {
        Self {
            base_fare: 2.0,
            per_km: 1.0,
            per_minute: 0.2,
            waiting_per_minute: 0.1,
            surge_multiplier: 1.0,
        }
    }
}

impl From<&tariff::Model> for Tariff {
    fn from(row: &tariff::Model) -> Self {
        Self {
            base_fare: row.base_fare,
            per_km: row.per_km,
            per_minute: row.per_minute,
            waiting_per_minute: row.waiting_per_minute,
            surge_multiplier: row.surge_multiplier,
        }
    }
}

impl Tariff {
    pub fn validate(&self) -> AppResult<()> {
        let fields = [
            ("base_fare", self.base_fare),
            ("per_km", self.per_km),
            ("per_minute", self.per_minute),
            ("waiting_per_minute", self.waiting_per_minute),
            ("surge_multiplier", self.surge_multiplier),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::Validation(format!(
                    "{} must be a non-negative number",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FareBreakdown {
    pub base: f64,
    pub distance_cost: f64,
    pub time_cost: f64,
    pub waiting_cost: f64,
    pub surge_multiplier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FareEstimate {
    pub distance_km: f64,
    pub fare_estimated: f64,
    pub breakdown: FareBreakdown,
}

/// Lowercased, trimmed vehicle class; empty input falls back to the default class.
pub fn normalize_vehicle_class(class: Option<&str>) -> String {
    match class.map(str::trim) {
        Some(c) if !c.is_empty() => c.to_lowercase(),
        _ => DEFAULT_VEHICLE_CLASS.to_string(),
    }
}

/// Price a known distance. Time and waiting costs are not metered yet and
/// stay at zero.
pub fn price_distance(tariff: &Tariff, distance_km: f64) -> FareEstimate {
    let breakdown = FareBreakdown {
        base: round_money(tariff.base_fare),
        distance_cost: round_money(distance_km * tariff.per_km),
        time_cost: 0.0,
        waiting_cost: 0.0,
        surge_multiplier: tariff.surge_multiplier,
    };

    let fare = (tariff.base_fare
        + distance_km * tariff.per_km
        + breakdown.time_cost
        + breakdown.waiting_cost)
        * tariff.surge_multiplier;

    FareEstimate {
        distance_km: (distance_km * 1000.0).round() / 1000.0,
        fare_estimated: round_money(fare),
        breakdown,
    }
}

/// Pure estimate between two points for a given tariff.
pub fn estimate_with(tariff: &Tariff, pickup: &GeoPoint, dropoff: &GeoPoint) -> FareEstimate {
    price_distance(tariff, pickup.distance_km(dropoff))
}

/// Newest active tariff for the class, or the built-in default.
pub async fn active_tariff<C: ConnectionTrait>(db: &C, vehicle_class: &str) -> AppResult<Tariff> {
    let row = tariff::Entity::find()
        .filter(tariff::Column::VehicleClass.eq(vehicle_class.to_lowercase()))
        .filter(tariff::Column::IsActive.eq(true))
        .order_by_desc(tariff::Column::UpdatedAt)
        .order_by_desc(tariff::Column::Id)
        .one(db)
        .await?;

    Ok(row.as_ref().map(Tariff::from).unwrap_or_default())
}

pub async fn estimate<C: ConnectionTrait>(
    db: &C,
    vehicle_class: &str,
    pickup: &GeoPoint,
    dropoff: &GeoPoint,
) -> AppResult<FareEstimate> {
    let tariff = active_tariff(db, vehicle_class).await?;
    Ok(estimate_with(&tariff, pickup, dropoff))
}

/// Publish a new active tariff for a class, retiring the previous ones.
pub async fn set_tariff<C: ConnectionTrait>(
    db: &C,
    vehicle_class: &str,
    tariff: Tariff,
) -> AppResult<tariff::Model> {
    tariff.validate()?;
    let class = normalize_vehicle_class(Some(vehicle_class));

    tariff::Entity::update_many()
        .col_expr(tariff::Column::IsActive, Expr::value(false))
        .filter(tariff::Column::VehicleClass.eq(class.clone()))
        .filter(tariff::Column::IsActive.eq(true))
        .exec(db)
        .await?;

    let row = tariff::ActiveModel {
        vehicle_class: Set(class.clone()),
        base_fare: Set(tariff.base_fare),
        per_km: Set(tariff.per_km),
        per_minute: Set(tariff.per_minute),
        waiting_per_minute: Set(tariff.waiting_per_minute),
        surge_multiplier: Set(tariff.surge_multiplier),
        is_active: Set(true),
        updated_at: Set(time::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    tracing::info!(vehicle_class = %class, base_fare = tariff.base_fare, per_km = tariff.per_km, "Tariff updated");
    Ok(row)
}
