use sea_orm_migration::{prelude::*, schema::*};

use super::m20241001_000002_create_trips::Trip;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TripLocation::Table)
                    .if_not_exists()
                    .col(pk_auto(TripLocation::Id))
                    .col(uuid(TripLocation::TripId).not_null())
                    .col(uuid(TripLocation::DriverId).not_null())
                    .col(double(TripLocation::Lat).not_null())
                    .col(double(TripLocation::Lon).not_null())
                    .col(double_null(TripLocation::Bearing))
                    .col(timestamp_with_time_zone(TripLocation::RecordedAt).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trip_location_trip")
                            .from(TripLocation::Table, TripLocation::TripId)
                            .to(Trip::Table, Trip::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trip_location_trip")
                    .table(TripLocation::Table)
                    .col(TripLocation::TripId)
                    .col(TripLocation::RecordedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TripHistory::Table)
                    .if_not_exists()
                    .col(pk_auto(TripHistory::Id))
                    .col(uuid(TripHistory::TripId).not_null())
                    .col(uuid_null(TripHistory::DriverId))
                    .col(uuid(TripHistory::PassengerId).not_null())
                    .col(string_len(TripHistory::VehicleClass, 32).not_null())
                    .col(string_len(TripHistory::Status, 16).not_null())
                    .col(double(TripHistory::PathDistanceKm).not_null())
                    .col(integer(TripHistory::SampleCount).not_null())
                    .col(big_integer_null(TripHistory::DurationSeconds))
                    .col(timestamp_with_time_zone_null(TripHistory::StartedAt))
                    .col(timestamp_with_time_zone(TripHistory::EndedAt).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trip_history_trip")
                            .from(TripHistory::Table, TripHistory::TripId)
                            .to(Trip::Table, Trip::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TripHistory::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(TripLocation::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum TripLocation {
    Table,
    Id,
    TripId,
    DriverId,
    Lat,
    Lon,
    Bearing,
    RecordedAt,
}

#[derive(DeriveIden)]
pub enum TripHistory {
    Table,
    Id,
    TripId,
    DriverId,
    PassengerId,
    VehicleClass,
    Status,
    PathDistanceKm,
    SampleCount,
    DurationSeconds,
    StartedAt,
    EndedAt,
}
