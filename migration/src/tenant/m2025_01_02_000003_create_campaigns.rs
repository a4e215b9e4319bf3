//! Campaigns and their target segment set.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Campaigns::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Campaigns::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Campaigns::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Campaigns::Kind).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Campaigns::Status)
                            .string_len(32)
                            .not_null()
                            .default("draft"),
                    )
                    .col(ColumnDef::new(Campaigns::Timezone).string_len(64).not_null())
                    .col(ColumnDef::new(Campaigns::MessageTemplate).text().not_null())
                    .col(
                        ColumnDef::new(Campaigns::LaunchedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Campaigns::TargetedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Campaigns::ContactedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Campaigns::FailedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Campaigns::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Campaigns::UpdatedAt)
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
                    .table(CampaignSegments::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CampaignSegments::CampaignId).uuid().not_null())
                    .col(ColumnDef::new(CampaignSegments::SegmentId).uuid().not_null())
                    .primary_key(
                        Index::create()
                            .col(CampaignSegments::CampaignId)
                            .col(CampaignSegments::SegmentId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_campaign_segments_campaign_id")
                            .from(CampaignSegments::Table, CampaignSegments::CampaignId)
                            .to(Campaigns::Table, Campaigns::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CampaignSegments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Campaigns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Campaigns {
    Table,
    Id,
    Name,
    Kind,
    Status,
    Timezone,
    MessageTemplate,
    LaunchedAt,
    TargetedCount,
    ContactedCount,
    FailedCount,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CampaignSegments {
    Table,
    CampaignId,
    SegmentId,
}
