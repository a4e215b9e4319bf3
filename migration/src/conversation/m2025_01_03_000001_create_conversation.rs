//! Conversation header row and its append-only message log.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Conversation::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Conversation::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Conversation::TenantSlug).string_len(64).not_null())
                    .col(ColumnDef::new(Conversation::CustomerPhone).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Conversation::Status)
                            .string_len(32)
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(Conversation::OriginCampaignId).uuid().null())
                    .col(
                        ColumnDef::new(Conversation::LastMessageAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Conversation::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Conversation::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Messages::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Messages::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Messages::Sequence)
                            .big_integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Messages::Direction).string_len(16).not_null())
                    .col(ColumnDef::new(Messages::Content).text().not_null())
                    .col(ColumnDef::new(Messages::Kind).string_len(32).not_null())
                    .col(ColumnDef::new(Messages::Status).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Messages::ProviderMessageId)
                            .string_len(255)
                            .null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Messages::IdempotencyKey)
                            .string_len(255)
                            .null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Messages::Error).text().null())
                    .col(
                        ColumnDef::new(Messages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Messages::SentAt).timestamp_with_time_zone().null())
                    .col(
                        ColumnDef::new(Messages::DeliveredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Messages::ReadAt).timestamp_with_time_zone().null())
                    .col(ColumnDef::new(Messages::FailedAt).timestamp_with_time_zone().null())
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Messages::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Conversation::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Conversation {
    Table,
    Id,
    TenantSlug,
    CustomerPhone,
    Status,
    OriginCampaignId,
    LastMessageAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Messages {
    Table,
    Id,
    Sequence,
    Direction,
    Content,
    Kind,
    Status,
    ProviderMessageId,
    IdempotencyKey,
    Error,
    CreatedAt,
    SentAt,
    DeliveredAt,
    ReadAt,
    FailedAt,
}
