//! Conversation header entity model
//!
//! Each conversation store holds at most one row here.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "conversation")]
pub struct Model {
    /// Deterministic identifier derived from (tenant, customer phone)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_slug: String,

    pub customer_phone: String,

    /// Status (active|paused|resolved|archived)
    pub status: String,

    pub origin_campaign_id: Option<Uuid>,

    pub last_message_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
