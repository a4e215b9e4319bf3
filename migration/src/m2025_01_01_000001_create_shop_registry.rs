//! Migration to create the shop registry table.
//!
//! The storefront domain is the primary key, which is what makes a registry
//! claim an exclusive insert-if-absent per domain.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ShopRegistry::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ShopRegistry::Domain)
                            .string_len(255)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ShopRegistry::TenantSlug).string_len(64).not_null())
                    .col(
                        ColumnDef::new(ShopRegistry::Status)
                            .string_len(32)
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(ShopRegistry::ConnectedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ShopRegistry::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_shop_registry_tenant_slug")
                    .table(ShopRegistry::Table)
                    .col(ShopRegistry::TenantSlug)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_shop_registry_tenant_slug").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(ShopRegistry::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ShopRegistry {
    Table,
    Domain,
    TenantSlug,
    Status,
    ConnectedAt,
    UpdatedAt,
}
