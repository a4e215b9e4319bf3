//! Connected storefront entity model
//!
//! The tenant's own record of a storefront link. The global shop registry is
//! the authority on ownership; this row is the cheaply reversible half of the
//! connect protocol.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connected_stores")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub domain: String,

    /// Status (active|disconnected|error)
    pub status: String,

    /// Scope granted by the storefront
    pub scope: String,

    /// AES-256-GCM encrypted access token
    pub access_token_ciphertext: Option<Vec<u8>>,

    pub connected_at: DateTimeWithTimeZone,

    pub last_sync_at: Option<DateTimeWithTimeZone>,

    pub disconnected_at: Option<DateTimeWithTimeZone>,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
