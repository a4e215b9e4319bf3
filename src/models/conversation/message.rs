//! Message entity model
//!
//! Rows are appended in `sequence` order and never deleted.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Position in the conversation log, starting at 1
    #[sea_orm(unique)]
    pub sequence: i64,

    /// Direction (inbound|outbound)
    pub direction: String,

    pub content: String,

    /// Content kind (text|template|media)
    pub kind: String,

    /// Delivery status (pending|sent|delivered|read|failed|received)
    pub status: String,

    /// Provider-assigned id; for inbound messages, the external message id
    #[sea_orm(unique)]
    pub provider_message_id: Option<String>,

    /// Caller-supplied key that makes send-message idempotent
    #[sea_orm(unique)]
    pub idempotency_key: Option<String>,

    /// Failure reason for terminal `failed` messages
    pub error: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub sent_at: Option<DateTimeWithTimeZone>,

    pub delivered_at: Option<DateTimeWithTimeZone>,

    pub read_at: Option<DateTimeWithTimeZone>,

    pub failed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
