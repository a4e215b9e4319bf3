//! Invitation entity model
//!
//! Invitations are single-use; only the SHA-256 digest of the token is kept.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "invitations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Invitee email, stored lowercase
    pub email: String,

    /// Role granted on acceptance
    pub role: String,

    /// Status (pending|accepted|expired|revoked)
    pub status: String,

    /// Hex SHA-256 digest of the invitation token
    #[sea_orm(unique)]
    pub token_digest: String,

    pub invited_by: Uuid,

    pub expires_at: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,

    pub accepted_at: Option<DateTimeWithTimeZone>,

    pub accepted_by: Option<Uuid>,

    pub revoked_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
