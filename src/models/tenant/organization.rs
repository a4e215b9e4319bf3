//! Organization entity model
//!
//! A tenant store holds at most one organization row; its presence marks the
//! tenant as provisioned.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "organization")]
pub struct Model {
    /// Stable tenant slug, also the actor key
    #[sea_orm(primary_key, auto_increment = false)]
    pub slug: String,

    /// Display name
    pub name: String,

    /// Optional logo location
    pub logo_url: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
