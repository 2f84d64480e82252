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
                    .table(Settlement::Table)
                    .if_not_exists()
                    .col(uuid(Settlement::TripId).primary_key())
                    .col(uuid(Settlement::DriverId).not_null())
                    .col(uuid(Settlement::PassengerId).not_null())
                    .col(double(Settlement::GrossFare).not_null())
                    .col(double(Settlement::DistanceKm).not_null())
                    .col(double_null(Settlement::CommissionRate))
                    .col(double_null(Settlement::CommissionAmount))
                    .col(double_null(Settlement::NetEarnings))
                    .col(string_len(Settlement::Status, 16).not_null())
                    .col(integer(Settlement::Attempts).not_null().default(0))
                    .col(text_null(Settlement::LastError))
                    .col(timestamp_with_time_zone(Settlement::CreatedAt).not_null())
                    .col(timestamp_with_time_zone_null(Settlement::SettledAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_settlement_trip")
                            .from(Settlement::Table, Settlement::TripId)
                            .to(Trip::Table, Trip::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PlatformEarning::Table)
                    .if_not_exists()
                    .col(uuid(PlatformEarning::Id).primary_key())
                    .col(uuid(PlatformEarning::TripId).not_null().unique_key())
                    .col(uuid(PlatformEarning::DriverId).not_null())
                    .col(double(PlatformEarning::GrossFare).not_null())
                    .col(double(PlatformEarning::CommissionRate).not_null())
                    .col(double(PlatformEarning::CommissionAmount).not_null())
                    .col(double(PlatformEarning::NetEarnings).not_null())
                    .col(timestamp_with_time_zone(PlatformEarning::CreatedAt).not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PlatformEarning::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Settlement::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Settlement {
    Table,
    TripId,
    DriverId,
    PassengerId,
    GrossFare,
    DistanceKm,
    CommissionRate,
    CommissionAmount,
    NetEarnings,
    Status,
    Attempts,
    LastError,
    CreatedAt,
    SettledAt,
}

#[derive(DeriveIden)]
enum PlatformEarning {
    Table,
    Id,
    TripId,
    DriverId,
    GrossFare,
    CommissionRate,
    CommissionAmount,
    NetEarnings,
    CreatedAt,
}
