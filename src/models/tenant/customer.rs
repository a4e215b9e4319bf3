//! Customer entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "customers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Lowercased email address (unique within the tenant)
    #[sea_orm(unique)]
    pub email: Option<String>,

    /// Normalized phone number, `+` followed by digits (unique within the tenant)
    #[sea_orm(unique)]
    pub phone: Option<String>,

    pub email_opt_in: bool,

    pub sms_opt_in: bool,

    /// Tags as a JSON array of strings
    #[sea_orm(column_type = "JsonBinary")]
    pub tags: JsonValue,

    /// Status (active|unsubscribed|blocked)
    pub status: String,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
