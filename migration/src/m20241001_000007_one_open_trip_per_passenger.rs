use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// Partial index: both PostgreSQL and SQLite accept the WHERE clause verbatim.
const CREATE: &str = "CREATE UNIQUE INDEX IF NOT EXISTS uq_trip_open_passenger \
    ON trip (passenger_id) WHERE status IN ('requested', 'accepted', 'ongoing')";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(CREATE).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP INDEX IF EXISTS uq_trip_open_passenger")
            .await?;
        Ok(())
    }
}
