use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::trip::TripStatus;

/// Terminal audit record for a trip; never updated once written.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "trip_history")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub trip_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub passenger_id: Uuid,
    pub vehicle_class: String,
    pub status: TripStatus,
    pub path_distance_km: f64,
    pub sample_count: i32,
    pub duration_seconds: Option<i64>,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub ended_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
