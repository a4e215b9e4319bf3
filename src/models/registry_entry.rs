//! Shop registry entity model
//!
//! Global, cross-tenant record of which tenant owns a storefront domain.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

/// Registry entry keyed by storefront domain
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "shop_registry")]
pub struct Model {
    /// Normalized storefront domain (primary key, exclusive per domain)
    #[sea_orm(primary_key, auto_increment = false)]
    pub domain: String,

    /// Slug of the tenant holding the claim
    pub tenant_slug: String,

    /// Claim status (active|disconnected|error)
    pub status: String,

    /// Timestamp when the claim was made
    pub connected_at: DateTimeWithTimeZone,

    /// Timestamp of the last status change
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
