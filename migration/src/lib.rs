pub use sea_orm_migration::prelude::*;

mod m20241001_000001_create_participants;
mod m20241001_000002_create_trips;
mod m20241001_000003_create_trip_trace;
mod m20241001_000004_create_pricing;
mod m20241001_000005_create_wallets;
mod m20241001_000006_create_settlements;
mod m20241001_000007_one_open_trip_per_passenger;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20241001_000001_create_participants::Migration),
            Box::new(m20241001_000002_create_trips::Migration),
            Box::new(m20241001_000003_create_trip_trace::Migration),
            Box::new(m20241001_000004_create_pricing::Migration),
            Box::new(m20241001_000005_create_wallets::Migration),
            Box::new(m20241001_000006_create_settlements::Migration),
            Box::new(m20241001_000007_one_open_trip_per_passenger::Migration),
        ]
    }
}
