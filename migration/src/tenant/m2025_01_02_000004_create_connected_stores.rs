//! The tenant's local view of its linked storefront.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ConnectedStores::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConnectedStores::Domain)
                            .string_len(255)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ConnectedStores::Status).string_len(32).not_null())
                    .col(ColumnDef::new(ConnectedStores::Scope).text().not_null())
                    .col(
                        ColumnDef::new(ConnectedStores::AccessTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ConnectedStores::ConnectedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectedStores::LastSyncAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ConnectedStores::DisconnectedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ConnectedStores::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ConnectedStores::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ConnectedStores {
    Table,
    Domain,
    Status,
    Scope,
    AccessTokenCiphertext,
    ConnectedAt,
    LastSyncAt,
    DisconnectedAt,
    UpdatedAt,
}
