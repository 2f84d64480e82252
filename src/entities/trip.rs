use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum TripStatus {
    #[sea_orm(string_value = "requested")]
    Requested,
    #[sea_orm(string_value = "accepted")]
    Accepted,
    #[sea_orm(string_value = "ongoing")]
    Ongoing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "canceled")]
    Canceled,
}

impl TripStatus {
    /// Statuses in which a trip holds its driver.
    pub const ACTIVE_FOR_DRIVER: [TripStatus; 2] = [TripStatus::Accepted, TripStatus::Ongoing];

    /// Statuses in which a trip still belongs to its passenger's present.
    pub const OPEN: [TripStatus; 3] = [
        TripStatus::Requested,
        TripStatus::Accepted,
        TripStatus::Ongoing,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Requested => "requested",
            TripStatus::Accepted => "accepted",
            TripStatus::Ongoing => "ongoing",
            TripStatus::Completed => "completed",
            TripStatus::Canceled => "canceled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "trip")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub passenger_id: Uuid,
    pub passenger_name: String,
    pub passenger_phone: String,
    pub driver_id: Option<Uuid>,
    pub vehicle_class: String,
    pub pickup_lat: f64,
    pub pickup_lon: f64,
    pub dropoff_lat: f64,
    pub dropoff_lon: f64,
    pub distance_km: f64,
    pub fare_estimated: f64,
    pub fare_final: Option<f64>,
    pub base_fare: f64,
    pub distance_cost: f64,
    pub time_cost: f64,
    pub waiting_cost: f64,
    pub surge_multiplier: f64,
    pub status: TripStatus,
    pub created_at: DateTimeWithTimeZone,
    pub accepted_at: Option<DateTimeWithTimeZone>,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub canceled_at: Option<DateTimeWithTimeZone>,
    pub canceled_by: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub cancel_reason: Option<String>,
    pub driver_rating: Option<i32>,
    #[sea_orm(column_type = "Text", nullable)]
    pub driver_comment: Option<String>,
    pub passenger_rating: Option<i32>,
    #[sea_orm(column_type = "Text", nullable)]
    pub passenger_comment: Option<String>,
}

impl Model {
    /// Timestamp of the most recent lifecycle transition.
    pub fn last_transition_at(&self) -> DateTimeWithTimeZone {
        [
            self.canceled_at,
            self.completed_at,
            self.started_at,
            self.accepted_at,
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(self.created_at)
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.passenger_id == user_id || self.driver_id == Some(user_id)
    }

    /// Users subscribed to this trip's channel.
    pub fn members(&self) -> Vec<Uuid> {
        let mut members = vec![self.passenger_id];
        members.extend(self.driver_id);
        members
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::passenger::Entity",
        from = "Column::PassengerId",
        to = "super::passenger::Column::Id"
    )]
    Passenger,
    #[sea_orm(
        belongs_to = "super::driver::Entity",
        from = "Column::DriverId",
        to = "super::driver::Column::Id"
    )]
    Driver,
    #[sea_orm(has_many = "super::trip_location::Entity")]
    Locations,
}

impl Related<super::passenger::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Passenger.def()
    }
}

impl Related<super::driver::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Driver.def()
    }
}

impl Related<super::trip_location::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Locations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
