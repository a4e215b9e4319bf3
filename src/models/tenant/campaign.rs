//! Campaign entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "campaigns")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub name: String,

    /// Kind (broadcast|automated)
    pub kind: String,

    /// Status (draft|scheduled|active|paused|completed|failed)
    pub status: String,

    /// IANA timezone name used for scheduling
    pub timezone: String,

    /// Content of the first outbound message
    pub message_template: String,

    /// Set on the first non-dry-run launch; freezes the target segment set
    pub launched_at: Option<DateTimeWithTimeZone>,

    pub targeted_count: i32,

    pub contacted_count: i32,

    pub failed_count: i32,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
