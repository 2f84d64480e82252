use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One sample of a trip's location trace.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "trip_location")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub trip_id: Uuid,
    pub driver_id: Uuid,
    pub lat: f64,
    pub lon: f64,
    pub bearing: Option<f64>,
    pub recorded_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::trip::Entity",
        from = "Column::TripId",
        to = "super::trip::Column::Id"
    )]
    Trip,
}

impl Related<super::trip::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Trip.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
