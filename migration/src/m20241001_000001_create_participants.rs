use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Driver::Table)
                    .if_not_exists()
                    .col(uuid(Driver::Id).primary_key())
                    .col(string_len(Driver::Name, 100).not_null())
                    .col(string_len_null(Driver::Phone, 32))
                    .col(string_len(Driver::VehicleClass, 32).not_null())
                    .col(boolean(Driver::Available).not_null().default(false))
                    .col(double_null(Driver::LastLat))
                    .col(double_null(Driver::LastLon))
                    .col(double_null(Driver::LastBearing))
                    .col(timestamp_with_time_zone_null(Driver::LocationUpdatedAt))
                    .col(double(Driver::Rating).not_null().default(0.0))
                    .col(integer(Driver::RatingCount).not_null().default(0))
                    .col(big_integer(Driver::RewardPoints).not_null().default(0))
                    .col(
                        timestamp_with_time_zone(Driver::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Matching scans available drivers by class
        manager
            .create_index(
                Index::create()
                    .name("idx_driver_available_class")
                    .table(Driver::Table)
                    .col(Driver::Available)
                    .col(Driver::VehicleClass)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Passenger::Table)
                    .if_not_exists()
                    .col(uuid(Passenger::Id).primary_key())
                    .col(string_len(Passenger::Name, 100).not_null())
                    .col(string_len(Passenger::Phone, 32).not_null())
                    .col(double_null(Passenger::LastLat))
                    .col(double_null(Passenger::LastLon))
                    .col(timestamp_with_time_zone_null(Passenger::LocationUpdatedAt))
                    .col(big_integer(Passenger::RewardPoints).not_null().default(0))
                    .col(
                        timestamp_with_time_zone(Passenger::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Passenger::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Driver::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Driver {
    Table,
    Id,
    Name,
    Phone,
    VehicleClass,
    Available,
    LastLat,
    LastLon,
    LastBearing,
    LocationUpdatedAt,
    Rating,
    RatingCount,
    RewardPoints,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum Passenger {
    Table,
    Id,
    Name,
    Phone,
    LastLat,
    LastLon,
    LocationUpdatedAt,
    RewardPoints,
    CreatedAt,
}
