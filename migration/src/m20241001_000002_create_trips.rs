use sea_orm_migration::{prelude::*, schema::*};

use super::m20241001_000001_create_participants::{Driver, Passenger};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Trip::Table)
                    .if_not_exists()
                    .col(uuid(Trip::Id).primary_key())
                    .col(uuid(Trip::PassengerId).not_null())
                    .col(string_len(Trip::PassengerName, 100).not_null())
                    .col(string_len(Trip::PassengerPhone, 32).not_null())
                    .col(uuid_null(Trip::DriverId))
                    .col(string_len(Trip::VehicleClass, 32).not_null())
                    .col(double(Trip::PickupLat).not_null())
                    .col(double(Trip::PickupLon).not_null())
                    .col(double(Trip::DropoffLat).not_null())
                    .col(double(Trip::DropoffLon).not_null())
                    .col(double(Trip::DistanceKm).not_null())
                    .col(double(Trip::FareEstimated).not_null())
                    .col(double_null(Trip::FareFinal))
                    .col(double(Trip::BaseFare).not_null())
                    .col(double(Trip::DistanceCost).not_null())
                    .col(double(Trip::TimeCost).not_null())
                    .col(double(Trip::WaitingCost).not_null())
                    .col(double(Trip::SurgeMultiplier).not_null())
                    // Stored as text so the schema is portable across backends
                    .col(string_len(Trip::Status, 16).not_null())
                    .col(timestamp_with_time_zone(Trip::CreatedAt).not_null())
                    .col(timestamp_with_time_zone_null(Trip::AcceptedAt))
                    .col(timestamp_with_time_zone_null(Trip::StartedAt))
                    .col(timestamp_with_time_zone_null(Trip::CompletedAt))
                    .col(timestamp_with_time_zone_null(Trip::CanceledAt))
                    .col(string_len_null(Trip::CanceledBy, 16))
                    .col(text_null(Trip::CancelReason))
                    .col(integer_null(Trip::DriverRating))
                    .col(text_null(Trip::DriverComment))
                    .col(integer_null(Trip::PassengerRating))
                    .col(text_null(Trip::PassengerComment))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trip_passenger")
                            .from(Trip::Table, Trip::PassengerId)
                            .to(Passenger::Table, Passenger::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trip_driver")
                            .from(Trip::Table, Trip::DriverId)
                            .to(Driver::Table, Driver::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trip_status")
                    .table(Trip::Table)
                    .col(Trip::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trip_driver_status")
                    .table(Trip::Table)
                    .col(Trip::DriverId)
                    .col(Trip::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Trip::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Trip {
    Table,
    Id,
    PassengerId,
    PassengerName,
    PassengerPhone,
    DriverId,
    VehicleClass,
    PickupLat,
    PickupLon,
    DropoffLat,
    DropoffLon,
    DistanceKm,
    FareEstimated,
    FareFinal,
    BaseFare,
    DistanceCost,
    TimeCost,
    WaitingCost,
    SurgeMultiplier,
    Status,
    CreatedAt,
    AcceptedAt,
    StartedAt,
    CompletedAt,
    CanceledAt,
    CanceledBy,
    CancelReason,
    DriverRating,
    DriverComment,
    PassengerRating,
    PassengerComment,
}
