use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Wallet::Table)
                    .if_not_exists()
                    .col(uuid(Wallet::Id).primary_key())
                    .col(uuid(Wallet::UserId).not_null())
                    .col(string_len(Wallet::Role, 16).not_null())
                    .col(double(Wallet::Balance).not_null().default(0.0))
                    .col(double(Wallet::TotalEarnings).not_null().default(0.0))
                    .col(timestamp_with_time_zone(Wallet::CreatedAt).not_null())
                    .to_owned(),
            )
            .await?;

        // One wallet per (user, role); the ledger upserts against this key
        manager
            .create_index(
                Index::create()
                    .name("idx_wallet_user_role")
                    .table(Wallet::Table)
                    .col(Wallet::UserId)
                    .col(Wallet::Role)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(LedgerTransaction::Table)
                    .if_not_exists()
                    .col(uuid(LedgerTransaction::Id).primary_key())
                    .col(uuid(LedgerTransaction::UserId).not_null())
                    .col(string_len(LedgerTransaction::Role, 16).not_null())
                    .col(double(LedgerTransaction::Amount).not_null())
                    .col(string_len(LedgerTransaction::Direction, 8).not_null())
                    .col(string_len(LedgerTransaction::Status, 16).not_null())
                    .col(string_len(LedgerTransaction::Method, 32).not_null())
                    .col(uuid_null(LedgerTransaction::TripId))
                    .col(string_len_null(LedgerTransaction::GatewayTxnId, 128))
                    .col(json(LedgerTransaction::Metadata).not_null())
                    .col(timestamp_with_time_zone(LedgerTransaction::CreatedAt).not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_ledger_transaction_user_role")
                    .table(LedgerTransaction::Table)
                    .col(LedgerTransaction::UserId)
                    .col(LedgerTransaction::Role)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(LedgerTransaction::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Wallet::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Wallet {
    Table,
    Id,
    UserId,
    Role,
    Balance,
    TotalEarnings,
    CreatedAt,
}

#[derive(DeriveIden)]
enum LedgerTransaction {
    Table,
    Id,
    UserId,
    Role,
    Amount,
    Direction,
    Status,
    Method,
    TripId,
    GatewayTxnId,
    Metadata,
    CreatedAt,
}
