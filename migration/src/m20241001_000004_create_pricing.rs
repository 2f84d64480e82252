use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Tariff::Table)
                    .if_not_exists()
                    .col(pk_auto(Tariff::Id))
                    .col(string_len(Tariff::VehicleClass, 32).not_null())
                    .col(double(Tariff::BaseFare).not_null())
                    .col(double(Tariff::PerKm).not_null())
                    .col(double(Tariff::PerMinute).not_null())
                    .col(double(Tariff::WaitingPerMinute).not_null())
                    .col(double(Tariff::SurgeMultiplier).not_null())
                    .col(boolean(Tariff::IsActive).not_null().default(true))
                    .col(timestamp_with_time_zone(Tariff::UpdatedAt).not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CommissionRate::Table)
                    .if_not_exists()
                    .col(pk_auto(CommissionRate::Id))
                    .col(double(CommissionRate::Percentage).not_null())
                    .col(boolean(CommissionRate::IsActive).not_null().default(true))
                    .col(timestamp_with_time_zone(CommissionRate::CreatedAt).not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CommissionRate::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Tariff::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Tariff {
    Table,
    Id,
    VehicleClass,
    BaseFare,
    PerKm,
    PerMinute,
    WaitingPerMinute,
    SurgeMultiplier,
    IsActive,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CommissionRate {
    Table,
    Id,
    Percentage,
    IsActive,
    CreatedAt,
}
